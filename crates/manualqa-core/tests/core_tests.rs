use std::fs;

use tempfile::TempDir;

use manualqa_core::chunker::{page_ordered_text, ChunkBuilder};
use manualqa_core::config::Config;
use manualqa_core::error::Error;
use manualqa_core::hierarchy::ChunkHierarchy;
use manualqa_core::registry::ManualRegistry;
use manualqa_core::scope::{ConversationState, Resolution, ScopeResolver, ScopeState};
use manualqa_core::settings::ChunkingConfig;
use manualqa_core::types::{ChunkLevel, ManualId, PageRecord};

fn small_budgets() -> ChunkingConfig {
    ChunkingConfig { small_tokens: 8, small_overlap_tokens: 2, mid_tokens: 20, big_tokens: 40, detect_headings: true }
}

fn sample_pages() -> Vec<PageRecord> {
    vec![
        PageRecord::new(
            1,
            "1 Introduction\nThis manual covers the vehicle and its safe operation in all conditions.\n\
             1.1 Safety\nAlways wear a seat belt while driving the vehicle on public roads.",
        ),
        PageRecord::new(2, ""),
        PageRecord::new(
            3,
            "2 MAINTENANCE\nCheck oil every month. Replace filters yearly.\n\
             2.1 Tyres\nInflate tyres to the pressure on the door label.",
        )
        .with_label("A-1"),
    ]
}

fn build(manual: &str) -> ChunkHierarchy {
    ChunkBuilder::new(small_budgets()).build(&ManualId::from(manual), &sample_pages()).expect("build")
}

#[test]
fn every_level_reconstructs_the_manual() {
    let h = build("vezel");
    let expected = page_ordered_text(&sample_pages());
    for level in ChunkLevel::ALL {
        assert_eq!(h.reconstruct(level), expected, "level {level} must cover the text exactly once");
    }
}

#[test]
fn hierarchy_shape_follows_budgets_and_headings() {
    let h = build("vezel");
    assert_eq!(h.counts(), (11, 4, 2));
    let bigs = h.level(ChunkLevel::Big);
    assert!(bigs[1].text.starts_with("2 MAINTENANCE"));
    assert_eq!(bigs[0].page_citation(), "pp. 1-2");
    assert_eq!(bigs[1].page_citation(), "p. A-1");
}

#[test]
fn containment_holds_at_every_level() {
    let h = build("vezel");
    h.validate().expect("valid hierarchy");
    for small in h.level(ChunkLevel::Small) {
        assert_eq!(small.page_start, small.page_end, "small chunks never cross pages");
        let ancestors = h.ancestors(&small.id);
        assert_eq!(ancestors.len(), 2);
        assert_eq!(ancestors[0].level, ChunkLevel::Mid);
        assert_eq!(ancestors[1].level, ChunkLevel::Big);
        assert!(ancestors[0].contains_pages_of(small));
        assert!(ancestors[1].contains_pages_of(ancestors[0]));
    }
}

#[test]
fn empty_page_still_yields_a_linked_chunk() {
    let h = build("vezel");
    let empty: Vec<_> = h.level(ChunkLevel::Small).iter().filter(|c| c.page_start.number == 2).collect();
    assert_eq!(empty.len(), 1);
    assert!(empty[0].is_empty());
    assert!(h.parent(empty[0]).is_some());
}

#[test]
fn lead_in_stays_within_page_and_mid() {
    let h = build("vezel");
    let smalls = h.level(ChunkLevel::Small);
    assert_eq!(smalls[1].lead_in, "the ");
    assert!(smalls[1].embedding_text().starts_with("the vehicle"));
    for (i, c) in smalls.iter().enumerate() {
        let first_in_mid = i == 0 || smalls[i - 1].parent_id != c.parent_id;
        let new_page = i == 0 || smalls[i - 1].page_end.seq != c.page_start.seq;
        if first_in_mid || new_page {
            assert!(c.lead_in.is_empty(), "chunk {} borrows across a boundary", c.id);
        }
    }
}

#[test]
fn degenerate_manual_yields_one_chunk_per_level() {
    let pages = vec![PageRecord::new(1, "Press the horn pad to sound the horn.")];
    let h = ChunkBuilder::default().build(&ManualId::from("tiny"), &pages).unwrap();
    assert_eq!(h.counts(), (1, 1, 1));
    let small = &h.level(ChunkLevel::Small)[0];
    let mid = &h.level(ChunkLevel::Mid)[0];
    let big = &h.level(ChunkLevel::Big)[0];
    assert_eq!(small.parent_id.as_deref(), Some(mid.id.as_str()));
    assert_eq!(mid.parent_id.as_deref(), Some(big.id.as_str()));
    assert_eq!(big.child_ids, vec![mid.id.clone()]);
    assert!(big.parent_id.is_none());
}

#[test]
fn no_pages_is_rejected() {
    let err = ChunkBuilder::default().build(&ManualId::from("none"), &[]).unwrap_err();
    assert!(matches!(err, Error::InvalidHierarchy(_)));
}

#[test]
fn rebuild_is_content_identical() {
    let a = build("vezel");
    let b = build("vezel");
    assert_eq!(a.shape(), b.shape());
    let ids_a: Vec<_> = a.iter().map(|c| c.id.clone()).collect();
    let ids_b: Vec<_> = b.iter().map(|c| c.id.clone()).collect();
    assert_eq!(ids_a, ids_b);

    let other = build("lancer");
    assert!(other.iter().all(|c| a.get(&c.id).is_none()), "ids are scoped to their manual");
}

#[test]
fn hierarchy_rehydrates_from_loose_chunks() {
    let h = build("vezel");
    let mut chunks: Vec<_> = h.iter().cloned().collect();
    chunks.reverse();
    let again = ChunkHierarchy::from_chunks(ManualId::from("vezel"), chunks.clone()).unwrap();
    assert_eq!(again.shape(), h.shape());

    chunks.retain(|c| !(c.level == ChunkLevel::Small && c.ordinal == 3));
    let err = ChunkHierarchy::from_chunks(ManualId::from("vezel"), chunks).unwrap_err();
    assert!(matches!(err, Error::InvalidHierarchy(_)));
}

#[test]
fn registry_scopes_lookups_by_manual() {
    let registry = ManualRegistry::new();
    let vezel = ManualId::from("vezel");
    registry.register(&vezel, build("vezel")).unwrap();

    assert!(registry.exists(&vezel));
    assert_eq!(registry.chunks_of(&vezel, ChunkLevel::Mid).unwrap().len(), 4);
    assert!(matches!(
        registry.chunks_of(&ManualId::from("ghost"), ChunkLevel::Small),
        Err(Error::UnknownManual(_))
    ));
    assert!(matches!(
        registry.register(&ManualId::from("lancer"), build("vezel")),
        Err(Error::InvalidHierarchy(_))
    ));
}

#[test]
fn reregistering_replaces_the_hierarchy() {
    let registry = ManualRegistry::new();
    let id = ManualId::from("vezel");
    registry.register(&id, build("vezel")).unwrap();
    let pages = vec![PageRecord::new(1, "Revised text.")];
    registry.register(&id, ChunkBuilder::default().build(&id, &pages).unwrap()).unwrap();

    assert_eq!(registry.list_manuals(), vec![id.clone()]);
    let smalls = registry.chunks_of(&id, ChunkLevel::Small).unwrap();
    assert_eq!(smalls.len(), 1);
    assert_eq!(smalls[0].text, "Revised text.");
}

fn registry_with(ids: &[&str]) -> ManualRegistry {
    let registry = ManualRegistry::new();
    for id in ids {
        let manual = ManualId::from(*id);
        let pages = vec![PageRecord::new(1, format!("Text of {id}."))];
        registry.register(&manual, ChunkBuilder::default().build(&manual, &pages).unwrap()).unwrap();
    }
    registry
}

#[test]
fn single_manual_is_fixed_automatically() {
    let registry = registry_with(&["honda_vezel"]);
    let resolver = ScopeResolver::default();
    let mut state = ConversationState::new();
    let r = resolver.resolve(&mut state, "oil capacity?", &registry);
    assert_eq!(r, Resolution::Fixed { manual: "honda_vezel".into(), question: "oil capacity?".into() });
    assert_eq!(state.active_manual(), Some(&ManualId::from("honda_vezel")));
}

#[test]
fn no_manuals_cannot_be_scoped() {
    let registry = ManualRegistry::new();
    let mut state = ConversationState::new();
    assert_eq!(ScopeResolver::default().resolve(&mut state, "anything", &registry), Resolution::NoManuals);
    assert_eq!(state.scope(), &ScopeState::Unset);
}

#[test]
fn ambiguity_lasts_one_turn_and_index_reply_picks() {
    let registry = registry_with(&["honda_vezel", "mitsubishi_lancer"]);
    let resolver = ScopeResolver::default();
    let mut state = ConversationState::new();

    let r = resolver.resolve(&mut state, "how do I check the oil?", &registry);
    assert!(matches!(r, Resolution::Ambiguous(ref c) if c.len() == 2));
    assert_eq!(state.scope().name(), "ambiguous");

    let r = resolver.resolve(&mut state, "2", &registry);
    assert_eq!(
        r,
        Resolution::Fixed { manual: "mitsubishi_lancer".into(), question: "how do I check the oil?".into() }
    );
    let history = state.turn_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].manual, None);
    assert_eq!(history[1].manual, Some(ManualId::from("mitsubishi_lancer")));
}

#[test]
fn ambiguous_then_unrelated_reply_asks_again() {
    let registry = registry_with(&["honda_vezel", "mitsubishi_lancer"]);
    let resolver = ScopeResolver::default();
    let mut state = ConversationState::new();
    resolver.resolve(&mut state, "oil?", &registry);
    let r = resolver.resolve(&mut state, "7", &registry);
    assert!(matches!(r, Resolution::Ambiguous(_)));
    let r = resolver.resolve(&mut state, "the vezel oil please", &registry);
    assert_eq!(r, Resolution::Fixed { manual: "honda_vezel".into(), question: "the vezel oil please".into() });
}

#[test]
fn scope_is_sticky_until_another_manual_is_named() {
    let registry = registry_with(&["honda_vezel", "mitsubishi_lancer"]);
    let resolver = ScopeResolver::default();
    let mut state = ConversationState::new();

    resolver.resolve(&mut state, "vezel tyre pressure", &registry);
    for follow_up in ["and when cold?", "what about the spare"] {
        let r = resolver.resolve(&mut state, follow_up, &registry);
        assert!(matches!(r, Resolution::Fixed { ref manual, .. } if manual.as_str() == "honda_vezel"));
    }
    let r = resolver.resolve(&mut state, "lancer clock reset", &registry);
    assert!(matches!(r, Resolution::Fixed { ref manual, .. } if manual.as_str() == "mitsubishi_lancer"));
}

#[test]
fn pinned_scope_ignores_mentions_until_cleared() {
    let registry = registry_with(&["honda_vezel", "mitsubishi_lancer"]);
    let resolver = ScopeResolver::default();
    let mut state = ConversationState::new();
    let vezel = ManualId::from("honda_vezel");

    resolver.select(&mut state, &vezel, &registry).unwrap();
    assert!(state.is_pinned());
    let r = resolver.resolve(&mut state, "lancer clock reset", &registry);
    assert!(matches!(r, Resolution::Fixed { ref manual, .. } if *manual == vezel));

    resolver.clear(&mut state);
    assert_eq!(state.scope(), &ScopeState::Unset);
    let r = resolver.resolve(&mut state, "lancer clock reset", &registry);
    assert!(matches!(r, Resolution::Fixed { ref manual, .. } if manual.as_str() == "mitsubishi_lancer"));
}

#[test]
fn selecting_unknown_manual_leaves_state_unchanged() {
    let registry = registry_with(&["honda_vezel", "mitsubishi_lancer"]);
    let resolver = ScopeResolver::default();
    let mut state = ConversationState::new();
    resolver.resolve(&mut state, "vezel oil", &registry);

    let err = resolver.select(&mut state, &ManualId::from("ghost"), &registry).unwrap_err();
    assert!(matches!(err, Error::UnknownManual(_)));
    assert_eq!(state.scope(), &ScopeState::Fixed(ManualId::from("honda_vezel")));
    assert!(!state.is_pinned());
}

#[test]
fn config_file_overrides_defaults() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("config.toml"),
        "[guard]\nmin_confidence = 0.6\n\n[retrieval]\ntop_k = 4\n\n[data]\nstore_dir = \"store\"\n",
    )
    .unwrap();
    let config = Config::load_from(tmp.path(), "test").unwrap();
    let settings = config.settings().unwrap();
    assert!((settings.guard.min_confidence - 0.6).abs() < 1e-6);
    assert_eq!(settings.retrieval.top_k, 4);
    assert_eq!(settings.chunking.small_tokens, 300);
    assert_eq!(config.get::<usize>("retrieval.top_k").unwrap(), 4);
    assert_eq!(config.path(&settings.data.store_dir), tmp.path().join("store"));
}

#[test]
fn inconsistent_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("config.toml"), "[chunking]\nmid_tokens = 10\n").unwrap();
    assert!(matches!(Config::load_from(tmp.path(), "test"), Err(Error::InvalidConfig(_))));
}
