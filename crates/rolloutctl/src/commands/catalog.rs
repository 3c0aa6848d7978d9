//! `version add`, `actor add` and `pin add` register what rollouts operate on.

use anyhow::{Context as _, bail};
use tracing::info;
use uuid::Uuid;

use rollout_state::{
    ActorDefinitionVersion, ActorPin, ActorRecord, CustomerTier, PinOrigin,
};

use super::Context;

pub fn add_version(
    ctx: &Context,
    definition: Uuid,
    repository: &str,
    tag: &str,
    make_default: bool,
) -> anyhow::Result<()> {
    if ctx.store.find_version(&definition, tag)?.is_some() {
        bail!("actor definition {definition} already has a version tagged {tag}");
    }
    let version = ActorDefinitionVersion {
        version_id: Uuid::new_v4(),
        actor_definition_id: definition,
        docker_repository: repository.to_string(),
        docker_image_tag: tag.to_string(),
    };
    ctx.store.put_version(&version)?;
    if make_default {
        ctx.store.set_default_version(&definition, &version.version_id)?;
    }
    info!(version = %version.version_id, tag, default = make_default, "version registered");
    ctx.emit(&version, |v| {
        format!(
            "version {} ({}:{}){}",
            v.version_id,
            v.docker_repository,
            v.docker_image_tag,
            if make_default { " [default]" } else { "" }
        )
    })
}

pub fn add_actors(
    ctx: &Context,
    definition: Uuid,
    tier: Option<&str>,
    count: usize,
) -> anyhow::Result<()> {
    let tier = tier
        .map(|t| {
            CustomerTier::parse(&t.to_ascii_uppercase())
                .with_context(|| format!("unknown tier {t:?}, expected TIER_0, TIER_1 or TIER_2"))
        })
        .transpose()?;
    let mut actors = Vec::with_capacity(count);
    for _ in 0..count {
        let actor = ActorRecord {
            actor_id: Uuid::new_v4(),
            actor_definition_id: definition,
            tier,
        };
        ctx.store.put_actor(&actor)?;
        actors.push(actor);
    }
    info!(definition = %definition, count, ?tier, "actors registered");
    ctx.emit(&actors, |actors| {
        actors
            .iter()
            .map(|a| a.actor_id.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    })
}

/// Pin an actor to a version on behalf of a user.
pub fn add_pin(ctx: &Context, definition: Uuid, actor: Uuid, version: Uuid) -> anyhow::Result<()> {
    match ctx.store.get_version(&version)? {
        Some(v) if v.actor_definition_id == definition => {}
        _ => bail!("version {version} does not belong to actor definition {definition}"),
    }
    let pin = ActorPin {
        actor_id: actor,
        actor_definition_id: definition,
        version_id: version,
        origin: PinOrigin::User,
        rollout_id: None,
        rollout_strategy: None,
        created_at: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    };
    ctx.store.put_pin(&pin)?;
    ctx.emit(&pin, |p| format!("actor {} pinned to version {}", p.actor_id, p.version_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_context;

    #[test]
    fn versions_actors_and_pins_land_in_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let def = Uuid::new_v4();

        add_version(&ctx, def, "airbyte/source-faker", "1.0.0", true).unwrap();
        assert!(add_version(&ctx, def, "airbyte/source-faker", "1.0.0", false).is_err());
        let default = ctx.store.get_default_version(&def).unwrap().unwrap();
        assert_eq!(default.docker_image_tag, "1.0.0");

        add_actors(&ctx, def, Some("tier_1"), 3).unwrap();
        let actors = ctx.store.list_actors(&def).unwrap();
        assert_eq!(actors.len(), 3);
        assert!(actors.iter().all(|a| a.tier == Some(CustomerTier::Tier1)));
        assert!(add_actors(&ctx, def, Some("gold"), 1).is_err());

        add_pin(&ctx, def, actors[0].actor_id, default.version_id).unwrap();
        let pins = ctx.store.list_pins(&def).unwrap();
        assert_eq!(pins.len(), 1);
        assert_eq!(pins[0].origin, PinOrigin::User);
        assert!(add_pin(&ctx, def, actors[1].actor_id, Uuid::new_v4()).is_err());
    }
}
