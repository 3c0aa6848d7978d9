//! Read-only commands: `show`, `list`, `tag`, `select`.

use rollout_controller::TierFilterRequest;
use uuid::Uuid;

use super::Context;
use crate::output;

pub fn show(ctx: &Context, rollout_id: Uuid) -> anyhow::Result<()> {
    let rollout = ctx.service.get_rollout(&rollout_id)?;
    ctx.emit(&rollout, output::rollout)
}

pub fn list(ctx: &Context, definition: Uuid, tag: Option<&str>) -> anyhow::Result<()> {
    let rollouts = ctx.service.list_rollouts(&definition, tag)?;
    ctx.emit(&rollouts, |rollouts| {
        if rollouts.is_empty() {
            return "no rollouts".to_string();
        }
        rollouts.iter().map(output::rollout_line).collect::<Vec<_>>().join("\n")
    })
}

pub fn tag(ctx: &Context, tiers: Vec<String>) -> anyhow::Result<()> {
    let filters = if tiers.is_empty() {
        Vec::new()
    } else {
        vec![TierFilterRequest::tiers(tiers)]
    };
    let tag = ctx.service.compute_tag(&filters)?;
    ctx.emit(&tag, |tag| tag.clone().unwrap_or_else(|| "<all tiers>".to_string()))
}

pub fn select(ctx: &Context, rollout_id: Uuid, pct: i64) -> anyhow::Result<()> {
    let selection = ctx.service.select_targets(&rollout_id, pct)?;
    ctx.emit(&selection, output::selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_context;

    #[test]
    fn tag_and_missing_rollouts() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        assert!(tag(&ctx, vec!["TIER_2".into(), "TIER_0".into()]).is_ok());
        assert!(tag(&ctx, vec!["TIER_7".into()]).is_err());
        assert!(show(&ctx, Uuid::new_v4()).is_err());
        assert!(list(&ctx, Uuid::new_v4(), None).is_ok());
        assert!(select(&ctx, Uuid::new_v4(), 10).is_err());
    }
}
