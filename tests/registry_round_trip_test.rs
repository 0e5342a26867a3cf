//! Black-box coverage for §8 "Registry: `Get(id)` after `Update(id, patch)`
//! equals the pre-update entry merged with `patch`; re-applying the same
//! patch is a no-op."

use arcco_agent::registry::{AgentPatch, AgentRegistry};

#[test]
fn update_merges_only_the_patched_fields() {
    let dir = tempfile::tempdir().unwrap();
    let registry = AgentRegistry::load(Some(dir.path().join("agents.json")));

    let before = registry.get_entry("web_search").unwrap();

    let patch = AgentPatch {
        model: Some("anthropic/claude-3-opus".to_string()),
        ..Default::default()
    };
    let after = registry.update("web_search", patch).unwrap();

    assert_eq!(after.model, "anthropic/claude-3-opus");
    assert_eq!(after.system_prompt, before.system_prompt);
    assert_eq!(after.tools, before.tools);
}

#[test]
fn reapplying_the_same_patch_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let registry = AgentRegistry::load(Some(dir.path().join("agents.json")));

    let patch = AgentPatch {
        system_prompt: Some("Seja conciso.".to_string()),
        ..Default::default()
    };
    let first = registry.update("chat", patch.clone()).unwrap();
    let second = registry.update("chat", patch).unwrap();

    assert_eq!(first.system_prompt, second.system_prompt);
    assert_eq!(first.model, second.model);
}

#[test]
fn reset_restores_the_compiled_default() {
    let dir = tempfile::tempdir().unwrap();
    let registry = AgentRegistry::load(Some(dir.path().join("agents.json")));

    let default_prompt = registry.get_prompt("chat").unwrap();
    registry
        .update(
            "chat",
            AgentPatch {
                system_prompt: Some("temporário".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_ne!(registry.get_prompt("chat").unwrap(), default_prompt);

    registry.reset("chat").unwrap();
    assert_eq!(registry.get_prompt("chat").unwrap(), default_prompt);
}
