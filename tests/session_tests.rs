//! Session behaviour over a shared repository
//!
//! These tests drive the public API end to end: sessions log into the
//! in-memory repository (behind the caching decorator), mutate, save and
//! observe each other's saves.

use std::sync::{Arc, Mutex};
use std::thread;

use arbor_store::item::{NodeTypeDefinition, PropertyDefinition, StaticSchema};
use arbor_store::{
    MemoryProvider, Path, PropertyRecord, PropertyType, QualifiedName, Repository, Result,
    Session, StorageProvider, StoreError, Value,
};

fn repo() -> Repository {
    Repository::in_memory().unwrap()
}

fn set_marker(session: &mut Session, path: &str, marker: i64) {
    session
        .set_property(&format!("{}/marker", path), PropertyRecord::single(Value::Long(marker)))
        .unwrap();
}

fn marker(session: &mut Session, path: &str) -> i64 {
    let id = session.property(&format!("{}/marker", path)).unwrap();
    session.value(id).unwrap().value().and_then(Value::as_long).unwrap()
}

/// Adds `count` same-name siblings at `path`, each marked with its
/// original position
fn add_siblings(session: &mut Session, path: &str, count: i64) {
    for marker in 1..=count {
        let node = session.add_node(path, None).unwrap();
        let added = session.path_of(node).unwrap();
        let added = session.format(&added);
        set_marker(session, &added, marker);
    }
}

// =============================================================================
// Reading and writing
// =============================================================================

#[test]
fn saved_content_is_visible_to_a_fresh_session() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    session.add_node("/a", None).unwrap();
    session.add_node("/a/b", None).unwrap();
    session
        .set_property("/a/b/title", PropertyRecord::single(Value::from("hello")))
        .unwrap();
    session.save().unwrap();

    let mut fresh = repo.login(None).unwrap();
    let title = fresh.property("/a/b/title").unwrap();
    assert_eq!(fresh.value(title).unwrap().value().and_then(Value::as_str), Some("hello"));

    let b = fresh.node("/a/b").unwrap();
    assert_eq!(fresh.primary_type(b).unwrap(), QualifiedName::unstructured());
}

#[test]
fn unsaved_content_stays_private() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    session.add_node("/draft", None).unwrap();

    let mut other = repo.login(None).unwrap();
    assert!(session.item_exists("/draft").unwrap());
    assert!(!other.item_exists("/draft").unwrap());
}

#[test]
fn an_item_is_resident_once() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    session.add_node("/a", None).unwrap();
    session.save().unwrap();

    let first = session.node("/a").unwrap();
    let second = session.node("/a").unwrap();
    let root = session.root_node();
    let listed = session.children(root).unwrap();

    assert_eq!(first, second);
    assert_eq!(listed, vec![first]);
    assert_eq!(session.parent_of(first).unwrap(), Some(root));
}

#[test]
fn multiplicity_is_fixed_at_creation() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    session.add_node("/a", None).unwrap();
    session
        .set_property("/a/p", PropertyRecord::single(Value::from("one")))
        .unwrap();

    let many = PropertyRecord::multiple(
        PropertyType::String,
        vec![Value::from("x"), Value::from("y")],
    )
    .unwrap();
    assert!(matches!(
        session.set_property("/a/p", many),
        Err(StoreError::ConstraintViolation(_))
    ));
}

#[test]
fn the_root_cannot_be_removed() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    assert!(matches!(
        session.remove("/"),
        Err(StoreError::ConstraintViolation(_))
    ));
}

#[test]
fn new_nodes_cannot_pick_an_index() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    assert!(matches!(
        session.add_node("/a[2]", None),
        Err(StoreError::InvalidPath { .. })
    ));
}

#[test]
fn missing_items_are_not_found() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    assert!(matches!(session.node("/nope"), Err(StoreError::PathNotFound(_))));
    assert!(matches!(
        session.add_node("/nope/child", None),
        Err(StoreError::PathNotFound(_))
    ));
}

// =============================================================================
// Same-name siblings
// =============================================================================

#[test]
fn removing_a_sibling_renumbers_the_rest() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    add_siblings(&mut session, "/a", 3);
    session.save().unwrap();

    session.remove("/a").unwrap();
    assert_eq!(marker(&mut session, "/a"), 2);
    assert_eq!(marker(&mut session, "/a[2]"), 3);
    assert!(!session.item_exists("/a[3]").unwrap());

    session.save().unwrap();
    let mut fresh = repo.login(None).unwrap();
    assert_eq!(marker(&mut fresh, "/a"), 2);
    assert_eq!(marker(&mut fresh, "/a[2]"), 3);
    assert!(!fresh.item_exists("/a[3]").unwrap());
}

#[test]
fn removing_two_siblings_in_one_save() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    add_siblings(&mut session, "/s", 4);
    session.save().unwrap();

    session.remove("/s[2]").unwrap();
    // The former /s[4] is now /s[3]
    session.remove("/s[3]").unwrap();
    session.save().unwrap();

    let mut fresh = repo.login(None).unwrap();
    assert_eq!(marker(&mut fresh, "/s"), 1);
    assert_eq!(marker(&mut fresh, "/s[2]"), 3);
    assert!(!fresh.item_exists("/s[3]").unwrap());
}

#[test]
fn a_sibling_added_after_a_removal_takes_the_next_index() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    add_siblings(&mut session, "/n", 2);
    session.save().unwrap();

    session.remove("/n").unwrap();
    let added = session.add_node("/n", None).unwrap();
    assert_eq!(
        session.path_of(added).unwrap(),
        session.parse_path("/n[2]").unwrap()
    );
    set_marker(&mut session, "/n[2]", 9);
    session.save().unwrap();

    let mut fresh = repo.login(None).unwrap();
    assert_eq!(marker(&mut fresh, "/n"), 2);
    assert_eq!(marker(&mut fresh, "/n[2]"), 9);
}

// =============================================================================
// Pending changes
// =============================================================================

#[test]
fn setting_then_removing_before_save_leaves_nothing() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    session.add_node("/x", None).unwrap();
    session.save().unwrap();

    session
        .set_property("/x/p", PropertyRecord::single(Value::from("v")))
        .unwrap();
    session.remove("/x/p").unwrap();
    session.add_node("/y", None).unwrap();
    session.remove("/y").unwrap();
    session.save().unwrap();

    let mut fresh = repo.login(None).unwrap();
    assert!(fresh.item_exists("/x").unwrap());
    assert!(!fresh.item_exists("/x/p").unwrap());
    assert!(!fresh.item_exists("/y").unwrap());
}

#[test]
fn modifications_propagate_one_level() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    session.add_node("/p", None).unwrap();
    let root = session.root_node();
    assert!(session.is_modified(root).unwrap());
    session.save().unwrap();

    let p = session.node("/p").unwrap();
    assert!(!session.is_modified(p).unwrap());
    session.add_node("/p/c", None).unwrap();
    assert!(session.is_modified(p).unwrap());
    assert!(session.has_pending_changes().unwrap());
}

#[test]
fn save_node_leaves_unrelated_siblings_pending() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    session.add_node("/n", None).unwrap();
    session.add_node("/m", None).unwrap();
    session.save().unwrap();

    session
        .set_property("/n/x", PropertyRecord::single(Value::from("kept")))
        .unwrap();
    session
        .set_property("/m/y", PropertyRecord::single(Value::from("pending")))
        .unwrap();
    let n = session.node("/n").unwrap();
    assert!(session.is_modified(n).unwrap());

    session.save_node(n).unwrap();
    assert!(!session.is_modified(n).unwrap());
    assert!(session.has_pending_changes().unwrap());

    let mut fresh = repo.login(None).unwrap();
    assert!(fresh.item_exists("/n/x").unwrap());
    assert!(!fresh.item_exists("/m/y").unwrap());
}

#[test]
fn save_node_persists_the_node_and_its_direct_children() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    session.add_node("/q", None).unwrap();
    session.save().unwrap();

    session.add_node("/q/c", None).unwrap();
    session.add_node("/q/c/d", None).unwrap();
    let q = session.node("/q").unwrap();
    session.save_node(q).unwrap();

    let mut fresh = repo.login(None).unwrap();
    assert!(fresh.item_exists("/q/c").unwrap());
    assert!(!fresh.item_exists("/q/c/d").unwrap());

    session.save().unwrap();
    let mut fresh = repo.login(None).unwrap();
    assert!(fresh.item_exists("/q/c/d").unwrap());
}

#[test]
fn refresh_discards_pending_changes() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    session.add_node("/kept", None).unwrap();
    session.save().unwrap();

    session.add_node("/dropped", None).unwrap();
    session.remove("/kept").unwrap();
    session.refresh().unwrap();

    assert!(!session.has_pending_changes().unwrap());
    assert!(session.item_exists("/kept").unwrap());
    assert!(!session.item_exists("/dropped").unwrap());
}

// =============================================================================
// Shared caching
// =============================================================================

#[test]
fn clean_values_follow_other_sessions_saves() {
    let repo = repo();
    let mut writer = repo.login(None).unwrap();
    writer.add_node("/c", None).unwrap();
    writer
        .set_property("/c/v", PropertyRecord::single(Value::Long(1)))
        .unwrap();
    writer.save().unwrap();

    let mut reader = repo.login(None).unwrap();
    let v = reader.property("/c/v").unwrap();
    assert_eq!(reader.value(v).unwrap().value().and_then(Value::as_long), Some(1));

    writer
        .set_property("/c/v", PropertyRecord::single(Value::Long(2)))
        .unwrap();
    writer.save().unwrap();

    assert_eq!(reader.value(v).unwrap().value().and_then(Value::as_long), Some(2));
}

#[test]
fn sessions_on_several_threads_see_each_others_saves() {
    let repo = Arc::new(repo());

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let repo = Arc::clone(&repo);
            thread::spawn(move || {
                let mut session = repo.login(None).unwrap();
                let path = format!("/t{}", i);
                session.add_node(&path, None).unwrap();
                set_marker(&mut session, &path, i);
                session.save().unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let mut session = repo.login(None).unwrap();
    for i in 0..4 {
        assert_eq!(marker(&mut session, &format!("/t{}", i)), i);
    }
}

#[test]
fn workspaces_are_isolated() {
    let repo = repo();
    repo.create_workspace("staging").unwrap();

    let mut staging = repo.login(Some("staging")).unwrap();
    staging.add_node("/only-here", None).unwrap();
    staging.save().unwrap();

    let mut default = repo.login(None).unwrap();
    assert!(!default.item_exists("/only-here").unwrap());
}

// =============================================================================
// Move and copy
// =============================================================================

#[test]
fn move_relocates_a_subtree() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    session.add_node("/src", None).unwrap();
    session.add_node("/src/leaf", None).unwrap();
    session.add_node("/dst", None).unwrap();
    session.save().unwrap();

    let landed = session.move_node("/src", "/dst/src").unwrap();
    assert_eq!(landed, session.parse_path("/dst/src").unwrap());

    let mut fresh = repo.login(None).unwrap();
    assert!(fresh.item_exists("/dst/src/leaf").unwrap());
    assert!(!fresh.item_exists("/src").unwrap());
}

#[test]
fn move_to_own_name_goes_last() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    add_siblings(&mut session, "/a", 3);
    session.save().unwrap();

    let landed = session.move_node("/a", "/a").unwrap();
    assert_eq!(landed, session.parse_path("/a[3]").unwrap());

    let mut fresh = repo.login(None).unwrap();
    assert_eq!(marker(&mut fresh, "/a"), 2);
    assert_eq!(marker(&mut fresh, "/a[2]"), 3);
    assert_eq!(marker(&mut fresh, "/a[3]"), 1);
}

#[test]
fn move_requires_a_clean_session() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    session.add_node("/m", None).unwrap();

    assert!(matches!(
        session.move_node("/m", "/n"),
        Err(StoreError::ConstraintViolation(_))
    ));
}

#[test]
fn move_into_own_subtree_is_refused() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    session.add_node("/m", None).unwrap();
    session.save().unwrap();

    assert!(session.move_node("/m", "/m/inner").is_err());
    assert!(session.item_exists("/m").unwrap());
}

#[test]
fn copies_get_fresh_reference_keys() {
    let keyed = QualifiedName::new(arbor_store::path::NT_URI, "keyed").unwrap();
    let schema = StaticSchema::new().with_type(
        NodeTypeDefinition::unstructured(keyed).with_property(
            PropertyDefinition::named(QualifiedName::uuid(), PropertyType::String)
                .auto_created(Vec::new()),
        ),
    );
    let repo = repo().with_schema(Arc::new(schema));
    let mut session = repo.login(None).unwrap();
    session.add_node("/r", Some("nt:keyed")).unwrap();
    session.save().unwrap();

    let key_of = |session: &mut Session, path: &str| {
        let id = session.property(&format!("{}/jcr:uuid", path)).unwrap();
        let record = session.value(id).unwrap();
        record.value().and_then(Value::as_str).unwrap().to_string()
    };
    let original = key_of(&mut session, "/r");
    let copy = session.copy_node("/r", "/r2").unwrap();
    assert_eq!(copy, session.parse_path("/r2").unwrap());

    let copied = key_of(&mut session, "/r2");
    assert_ne!(original, copied);

    let found = session.node_by_identifier(&original).unwrap();
    assert_eq!(session.path_of(found).unwrap(), session.parse_path("/r").unwrap());
    let found = session.node_by_identifier(&copied).unwrap();
    assert_eq!(session.path_of(found).unwrap(), session.parse_path("/r2").unwrap());
}

// =============================================================================
// Stable handles
// =============================================================================

#[test]
fn handles_follow_renumbering() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    add_siblings(&mut session, "/h", 3);
    session.save().unwrap();

    let first = session.node("/h").unwrap();
    let third = session.node("/h[3]").unwrap();
    let gone = session.handle_for(first).unwrap();
    let last = session.handle_for(third).unwrap();

    session.remove("/h").unwrap();

    assert!(session.node_by_handle(gone).is_err());
    let node = session.node_by_handle(last).unwrap();
    assert_eq!(session.path_of(node).unwrap(), session.parse_path("/h[2]").unwrap());
}

#[test]
fn handles_follow_moves() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    session.add_node("/from", None).unwrap();
    session.add_node("/from/leaf", None).unwrap();
    session.add_node("/to", None).unwrap();
    session.save().unwrap();

    let leaf = session.node("/from/leaf").unwrap();
    let handle = session.handle_for(leaf).unwrap();
    session.move_node("/from", "/to/from").unwrap();

    let node = session.node_by_handle(handle).unwrap();
    assert_eq!(
        session.path_of(node).unwrap(),
        session.parse_path("/to/from/leaf").unwrap()
    );
}

// =============================================================================
// Unsupported features
// =============================================================================

#[test]
fn unsupported_features_say_so() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();

    assert!(matches!(session.lock("/"), Err(StoreError::Unsupported(_))));
    assert!(matches!(session.unlock("/"), Err(StoreError::Unsupported(_))));
    assert!(matches!(session.checkin("/"), Err(StoreError::Unsupported(_))));
    assert!(matches!(session.checkout("/"), Err(StoreError::Unsupported(_))));
    assert!(matches!(
        session.add_event_listener("/"),
        Err(StoreError::Unsupported(_))
    ));
}

#[test]
fn save_node_after_sibling_removal_keeps_its_writes() {
    let repo = repo();
    let mut session = repo.login(None).unwrap();
    session.add_node("/p", None).unwrap();
    add_siblings(&mut session, "/p/a", 3);
    session.save().unwrap();

    session.remove("/p/a[2]").unwrap();
    session
        .set_property("/p/a[2]/x", PropertyRecord::single(Value::from("keep")))
        .unwrap();
    let shifted = session.node("/p/a[2]").unwrap();
    session.save_node(shifted).unwrap();
    session.save().unwrap();

    let mut fresh = repo.login(None).unwrap();
    let x = fresh.property("/p/a[2]/x").unwrap();
    assert_eq!(fresh.value(x).unwrap().value().and_then(Value::as_str), Some("keep"));
    assert_eq!(marker(&mut fresh, "/p/a[2]"), 3);
    assert!(!fresh.item_exists("/p/a[3]").unwrap());
}

// =============================================================================
// Partial saves
// =============================================================================

/// Memory backend whose `put_property` fails for one chosen path
struct FailingWrites {
    inner: MemoryProvider,
    fail_on: Mutex<Option<String>>,
}

impl FailingWrites {
    fn new() -> Self {
        Self {
            inner: MemoryProvider::new(),
            fail_on: Mutex::new(None),
        }
    }

    fn fail_on(&self, path: Option<&str>) {
        *self.fail_on.lock().unwrap() = path.map(str::to_string);
    }
}

impl StorageProvider for FailingWrites {
    fn name(&self) -> &str {
        "failing-writes"
    }
    fn workspaces(&self) -> Result<Vec<String>> {
        self.inner.workspaces()
    }
    fn create_workspace(&self, workspace: &str) -> Result<()> {
        self.inner.create_workspace(workspace)
    }
    fn node_exists(&self, workspace: &str, path: &Path) -> Result<bool> {
        self.inner.node_exists(workspace, path)
    }
    fn property_exists(&self, workspace: &str, path: &Path) -> Result<bool> {
        self.inner.property_exists(workspace, path)
    }
    fn list_children(&self, workspace: &str, path: &Path) -> Result<Vec<Path>> {
        self.inner.list_children(workspace, path)
    }
    fn list_properties(&self, workspace: &str, path: &Path) -> Result<Vec<QualifiedName>> {
        self.inner.list_properties(workspace, path)
    }
    fn get_property(&self, workspace: &str, path: &Path) -> Result<PropertyRecord> {
        self.inner.get_property(workspace, path)
    }
    fn add_node(&self, workspace: &str, path: &Path) -> Result<()> {
        self.inner.add_node(workspace, path)
    }
    fn put_property(&self, workspace: &str, path: &Path, record: &PropertyRecord) -> Result<()> {
        if self.fail_on.lock().unwrap().as_deref() == Some(path.to_string().as_str()) {
            return Err(StoreError::provider(workspace, path, "write rejected"));
        }
        self.inner.put_property(workspace, path, record)
    }
    fn remove(&self, workspace: &str, path: &Path) -> Result<()> {
        self.inner.remove(workspace, path)
    }
    fn copy(&self, workspace: &str, from: &Path, to: &Path) -> Result<()> {
        self.inner.copy(workspace, from, to)
    }
    fn move_path(&self, workspace: &str, from: &Path, to: &Path) -> Result<()> {
        self.inner.move_path(workspace, from, to)
    }
}

#[test]
fn failed_save_keeps_unflushed_nodes_dirty_and_can_be_retried() {
    let backend = Arc::new(FailingWrites::new());
    let repo = Repository::new(Arc::clone(&backend) as Arc<dyn StorageProvider>).unwrap();
    let mut session = repo.login(None).unwrap();
    session.add_node("/a", None).unwrap();
    session.add_node("/b", None).unwrap();
    session.save().unwrap();

    session
        .set_property("/a/x", PropertyRecord::single(Value::from("first")))
        .unwrap();
    session
        .set_property("/b/y", PropertyRecord::single(Value::from("second")))
        .unwrap();
    backend.fail_on(Some("/b/y"));

    let err = session.save().unwrap_err();
    assert!(matches!(err, StoreError::ProviderFailure { .. }));

    let a = session.node("/a").unwrap();
    let b = session.node("/b").unwrap();
    assert!(!session.is_modified(a).unwrap());
    assert!(session.is_modified(b).unwrap());
    assert!(session.has_pending_changes().unwrap());

    let mut fresh = repo.login(None).unwrap();
    assert!(fresh.item_exists("/a/x").unwrap());
    assert!(!fresh.item_exists("/b/y").unwrap());

    backend.fail_on(None);
    session.save().unwrap();
    assert!(!session.has_pending_changes().unwrap());

    let mut fresh = repo.login(None).unwrap();
    let y = fresh.property("/b/y").unwrap();
    assert_eq!(fresh.value(y).unwrap().value().and_then(Value::as_str), Some("second"));
}
