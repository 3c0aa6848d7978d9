//! Text rendering for `--format text`.

use rollout_controller::{ActorSelection, PinSettlement};
use rollout_state::Rollout;

pub fn rollout(r: &Rollout) -> String {
    let mut out = format!(
        "rollout {}\n  state:     {}\n  strategy:  {}\n  progress:  {}%",
        r.id, r.state, r.rollout_strategy, r.current_rollout_pct
    );
    if let Some(target) = r.final_target_rollout_pct {
        out.push_str(&format!(" (target {target}%)"));
    }
    out.push_str(&format!("\n  tag:       {}", r.tag.as_deref().unwrap_or("<all tiers>")));
    if let Some(run) = &r.workflow_run_id {
        out.push_str(&format!("\n  workflow:  {run}"));
    }
    if let Some(reason) = &r.paused_reason {
        out.push_str(&format!("\n  paused:    {reason}"));
    }
    if let Some(msg) = &r.error_msg {
        out.push_str(&format!("\n  error:     {msg}"));
    }
    out
}

pub fn rollout_line(r: &Rollout) -> String {
    format!(
        "{}  {:<20}  {:>3}%  {}",
        r.id,
        r.state.as_str(),
        r.current_rollout_pct,
        r.tag.as_deref().unwrap_or("-")
    )
}

pub fn settlement(s: &PinSettlement) -> String {
    match s {
        PinSettlement::Removed(n) => format!("{n} removed"),
        PinSettlement::Retained => "retained".to_string(),
        PinSettlement::PromotedAndRemoved(n) => format!("release candidate promoted, {n} removed"),
    }
}

pub fn selection(s: &ActorSelection) -> String {
    let mut out = format!(
        "{} of {} actors targeted ({}%), {} new, {} already pinned, {} total",
        s.targeted.len(),
        s.eligible_or_pinned,
        s.pinned_pct(),
        s.newly_selected.len(),
        s.previously_pinned,
        s.total_actors
    );
    for id in &s.newly_selected {
        out.push_str(&format!("\n  + {id}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settlement_text() {
        assert_eq!(settlement(&PinSettlement::Removed(3)), "3 removed");
        assert_eq!(settlement(&PinSettlement::Retained), "retained");
    }
}
