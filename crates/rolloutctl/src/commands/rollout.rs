//! Rollout commands: `create`, `start`, `advance`, `pause`, `finalize`.

use rollout_controller::{
    AdvanceRolloutRequest, CreateRolloutRequest, FinalizeRolloutRequest, PauseRolloutRequest,
    StartRolloutRequest,
};

use super::Context;
use crate::output;

pub async fn create(ctx: &Context, req: CreateRolloutRequest) -> anyhow::Result<()> {
    let rollout = ctx.service.create_rollout(req).await?;
    ctx.emit(&rollout, output::rollout)
}

pub async fn start(ctx: &Context, req: StartRolloutRequest) -> anyhow::Result<()> {
    let rollout = ctx.service.start_rollout(req).await?;
    ctx.emit(&rollout, output::rollout)
}

pub async fn advance(ctx: &Context, req: AdvanceRolloutRequest) -> anyhow::Result<()> {
    let outcome = ctx.service.advance_rollout(req).await?;
    ctx.emit(&outcome, |o| {
        format!(
            "{}\npinned {} new actor(s)",
            output::rollout(&o.rollout),
            o.pins_created
        )
    })
}

pub async fn pause(ctx: &Context, req: PauseRolloutRequest) -> anyhow::Result<()> {
    let rollout = ctx.service.pause_rollout(req).await?;
    ctx.emit(&rollout, output::rollout)
}

pub async fn finalize(ctx: &Context, req: FinalizeRolloutRequest) -> anyhow::Result<()> {
    let outcome = ctx.service.finalize_rollout(req).await?;
    ctx.emit(&outcome, |o| {
        format!(
            "{}\npins: {}",
            output::rollout(&o.rollout),
            output::settlement(&o.settlement)
        )
    })
}
