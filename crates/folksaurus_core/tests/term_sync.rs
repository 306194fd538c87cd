use folksaurus_core::db::open_db_in_memory;
use folksaurus_core::repo::term_repo::{slugify, suffixed_slug};
use folksaurus_core::{
    DisplayStatus, Propagation, ReferenceRole, RelationshipEdge, RepoError, ResolutionError,
    SqliteTermStore, SyncConfig, SyncError, Taxonomy, Term, TermData, TermReference, TermStore,
    TermSynchronizer, TermValidationError,
};
use rusqlite::Connection;

type Synchronizer<'conn> = TermSynchronizer<SqliteTermStore<'conn>>;

fn synchronizer(conn: &Connection) -> Synchronizer<'_> {
    TermSynchronizer::new(SqliteTermStore::try_new(conn).unwrap())
}

fn seed(sync: &Synchronizer<'_>, name: &str, external_id: i64) -> i64 {
    seed_with_slug(sync, name, &slugify(name), external_id)
}

fn seed_with_slug(sync: &Synchronizer<'_>, name: &str, slug: &str, external_id: i64) -> i64 {
    let store = sync.store();
    let local_id = store
        .insert_term(name, slug, Some(&Taxonomy::Category))
        .unwrap();
    store
        .write_term_data(
            local_id,
            &TermData {
                external_id,
                scope_note: "A term".to_string(),
                preferred: true,
                ambiguous: false,
                deleted: false,
                last_retrieved: 1_000,
            },
        )
        .unwrap();
    local_id
}

fn fetched(local_id: i64, external_id: i64, name: &str) -> Term {
    let mut term = Term::new(external_id, name);
    term.local_id = Some(local_id);
    term.scope_note = "A term".to_string();
    term.last_retrieved = 2_000;
    term
}

fn classification(sync: &Synchronizer<'_>, local_id: i64) -> i64 {
    sync.store()
        .classification_id(local_id, &Taxonomy::Category)
        .unwrap()
        .unwrap()
}

fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

#[test]
fn broader_reference_creates_placeholder_edge_and_parent() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let bar = seed(&sync, "Bar", 200);

    let mut term = fetched(bar, 200, "Bar");
    term.broader.push(TermReference::new(500, "SuperBar"));
    let report = sync.save(&term).unwrap();

    let store = sync.store();
    let super_bar = store.find_by_external_id(500).unwrap().unwrap();
    let placeholder = store.get_term(super_bar).unwrap().unwrap();
    assert_eq!(placeholder.name, "SuperBar");
    assert_eq!(placeholder.slug, "superbar");
    assert_eq!(placeholder.data, Some(TermData::placeholder(500)));
    assert_eq!(placeholder.display_status(), DisplayStatus::None);
    assert_eq!(
        store.classification_of(super_bar).unwrap(),
        Some(Taxonomy::Category)
    );

    assert_eq!(report.local_id, bar);
    assert!(!report.created);
    assert_eq!(report.edges_written, 1);
    assert!(report.skipped_references.is_empty());
    assert_eq!(
        store.relationships_for(bar).unwrap(),
        vec![RelationshipEdge::narrower(super_bar, bar)]
    );
    assert_eq!(
        store.parent_of(bar, &Taxonomy::Category).unwrap(),
        Some(super_bar)
    );
}

#[test]
fn narrower_reference_points_child_parent_at_saved_term() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let bar = seed(&sync, "Bar", 200);

    let mut term = fetched(bar, 200, "Bar");
    term.narrower.push(TermReference::new(600, "SubBar"));
    sync.save(&term).unwrap();

    let store = sync.store();
    let sub_bar = store.find_by_external_id(600).unwrap().unwrap();
    assert_eq!(
        store.relationships_for(bar).unwrap(),
        vec![RelationshipEdge::narrower(bar, sub_bar)]
    );
    assert_eq!(
        store.parent_of(sub_bar, &Taxonomy::Category).unwrap(),
        Some(bar)
    );
    assert_eq!(store.parent_of(bar, &Taxonomy::Category).unwrap(), None);
}

#[test]
fn saving_same_record_twice_keeps_edge_set() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let foo = seed(&sync, "Foo", 300);

    let mut term = fetched(foo, 300, "Foo");
    term.broader.push(TermReference::new(500, "SuperFoo"));
    term.narrower.push(TermReference::new(600, "SubFoo"));
    term.related.push(TermReference::new(700, "Fooish"));
    term.used_for.push(TermReference::new(800, "Phoo"));

    let first = sync.save(&term).unwrap();
    let edges_after_first = sync.store().relationships_for(foo).unwrap();
    let terms_after_first = count_rows(&conn, "terms");

    let second = sync.save(&term).unwrap();

    assert_eq!(first.edges_written, 4);
    assert_eq!(second.edges_written, 4);
    assert_eq!(sync.store().relationships_for(foo).unwrap(), edges_after_first);
    assert_eq!(count_rows(&conn, "terms"), terms_after_first);
    assert_eq!(count_rows(&conn, "term_relationships"), 4);
}

#[test]
fn related_edge_is_stored_once_from_either_side() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let first = seed(&sync, "Ale", 10);
    let second = seed(&sync, "Beer", 20);

    let mut ale = fetched(first, 10, "Ale");
    ale.related.push(TermReference::new(20, "Beer"));
    sync.save(&ale).unwrap();

    let mut beer = fetched(second, 20, "Beer");
    beer.related.push(TermReference::new(10, "Ale"));
    sync.save(&beer).unwrap();

    let expected = vec![RelationshipEdge::related(first, second)];
    assert_eq!(sync.store().relationships_for(first).unwrap(), expected);
    assert_eq!(sync.store().relationships_for(second).unwrap(), expected);
    assert_eq!(count_rows(&conn, "term_relationships"), 1);
    assert!(expected[0].term_id < expected[0].related_id);
}

#[test]
fn use_and_used_for_edges_point_from_preferred_term() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let alias = seed(&sync, "Phoo", 301);

    let mut term = fetched(alias, 301, "Phoo");
    term.use_terms.push(TermReference::new(300, "Foo"));
    let report = sync.save(&term).unwrap();

    let store = sync.store();
    let foo = store.find_by_external_id(300).unwrap().unwrap();
    assert_eq!(
        store.relationships_for(alias).unwrap(),
        vec![RelationshipEdge::used_for(foo, alias)]
    );
    let record = store.get_term(alias).unwrap().unwrap();
    assert!(!record.is_preferred());
    assert_eq!(record.display_status(), DisplayStatus::NonPreferred);
    assert_eq!(
        report.propagation,
        Propagation::Repointed {
            from: classification(&sync, alias),
            to: classification(&sync, foo),
            moved: 0,
        }
    );
}

#[test]
fn resolving_unknown_reference_twice_creates_one_placeholder() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let reference = TermReference::new(700, "Baz");

    let first = sync.resolve(&reference, Some(&Taxonomy::Category)).unwrap();
    let second = sync.resolve(&reference, Some(&Taxonomy::Category)).unwrap();

    assert_eq!(first, second);
    assert_eq!(sync.store().find_by_name("Baz").unwrap().len(), 1);
    assert_eq!(count_rows(&conn, "term_data"), 1);
}

#[test]
fn resolve_links_unmapped_local_term_with_same_name() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let local = sync.store().insert_term("Qux", "qux", None).unwrap();

    let resolved = sync
        .resolve(&TermReference::new(800, "Qux"), Some(&Taxonomy::PostTag))
        .unwrap();

    assert_eq!(resolved, local);
    let record = sync.store().get_term(local).unwrap().unwrap();
    assert_eq!(record.external_id(), Some(800));
    assert_eq!(
        sync.store().classification_of(local).unwrap(),
        Some(Taxonomy::PostTag)
    );
}

#[test]
fn slug_collision_gets_numeric_suffix() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    seed(&sync, "Dup", 1);

    let resolved = sync
        .resolve(&TermReference::new(2, "Dup"), Some(&Taxonomy::Category))
        .unwrap();

    let record = sync.store().get_term(resolved).unwrap().unwrap();
    assert_eq!(record.slug, "dup-2");
    assert_eq!(record.external_id(), Some(2));
}

#[test]
fn tenth_slug_candidate_is_still_tried() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    for attempt in 0..9 {
        seed_with_slug(&sync, "Dup", &suffixed_slug("dup", attempt), 1_000 + i64::from(attempt));
    }

    let resolved = sync
        .resolve(&TermReference::new(99, "Dup"), Some(&Taxonomy::Category))
        .unwrap();

    let record = sync.store().get_term(resolved).unwrap().unwrap();
    assert_eq!(record.slug, "dup-10");
}

#[test]
fn slug_exhaustion_skips_only_that_edge() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    for attempt in 0..10 {
        seed_with_slug(&sync, "Dup", &suffixed_slug("dup", attempt), 1_000 + i64::from(attempt));
    }

    let err = sync
        .resolve(&TermReference::new(99, "Dup"), Some(&Taxonomy::Category))
        .unwrap_err();
    assert!(matches!(
        err,
        ResolutionError::Exhausted {
            external_id: 99,
            attempts: 10,
            ..
        }
    ));

    let bar = seed(&sync, "Bar", 200);
    let mut term = fetched(bar, 200, "Bar");
    term.broader.push(TermReference::new(99, "Dup"));
    term.related.push(TermReference::new(7, "Pub"));
    let report = sync.save(&term).unwrap();

    assert_eq!(report.edges_written, 1);
    assert_eq!(report.skipped_references.len(), 1);
    assert_eq!(report.skipped_references[0].role, ReferenceRole::Broader);
    assert_eq!(report.skipped_references[0].reference.external_id, 99);
    assert_eq!(sync.store().find_by_external_id(99).unwrap(), None);
    assert_eq!(sync.store().parent_of(bar, &Taxonomy::Category).unwrap(), None);
}

#[test]
fn configured_retry_bound_limits_attempts() {
    let conn = open_db_in_memory().unwrap();
    let config = SyncConfig {
        slug_retry_attempts: 2,
        ..SyncConfig::default()
    };
    let sync = TermSynchronizer::with_config(SqliteTermStore::try_new(&conn).unwrap(), &config);
    seed_with_slug(&sync, "Dup", "dup", 1);
    seed_with_slug(&sync, "Dup", "dup-2", 2);

    let err = sync
        .resolve(&TermReference::new(3, "Dup"), None)
        .unwrap_err();
    assert!(matches!(err, ResolutionError::Exhausted { attempts: 2, .. }));
}

#[test]
fn preferred_term_losing_preference_repoints_content() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let foo = seed(&sync, "Foo", 300);
    let foo_class = classification(&sync, foo);
    for content_id in [1, 2, 3] {
        sync.store().link_content(content_id, foo_class).unwrap();
    }

    let mut term = fetched(foo, 300, "Foo");
    term.use_terms.push(TermReference::new(400, "RealFoo"));
    let report = sync.save(&term).unwrap();

    let store = sync.store();
    let real_foo = store.find_by_external_id(400).unwrap().unwrap();
    let real_class = classification(&sync, real_foo);

    let record = store.get_term(foo).unwrap().unwrap();
    assert!(!record.data.unwrap().preferred);
    assert_eq!(
        report.propagation,
        Propagation::Repointed {
            from: foo_class,
            to: real_class,
            moved: 3,
        }
    );
    assert!(store.content_for(foo_class).unwrap().is_empty());
    assert_eq!(store.content_for(real_class).unwrap(), vec![1, 2, 3]);
    assert_eq!(
        store.relationships_for(foo).unwrap(),
        vec![RelationshipEdge::used_for(real_foo, foo)]
    );
}

#[test]
fn repointing_skips_content_already_on_preferred_term() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let foo = seed(&sync, "Foo", 300);
    let real_foo = seed(&sync, "RealFoo", 400);
    let foo_class = classification(&sync, foo);
    let real_class = classification(&sync, real_foo);
    for content_id in [1, 2] {
        sync.store().link_content(content_id, foo_class).unwrap();
    }
    for content_id in [2, 5] {
        sync.store().link_content(content_id, real_class).unwrap();
    }

    let mut term = fetched(foo, 300, "Foo");
    term.use_terms.push(TermReference::new(400, "RealFoo"));
    sync.save(&term).unwrap();

    assert_eq!(
        sync.store().content_for(real_class).unwrap(),
        vec![1, 2, 5]
    );
    assert!(sync.store().content_for(foo_class).unwrap().is_empty());
}

#[test]
fn ambiguous_term_keeps_its_content() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let foo = seed(&sync, "Foo", 300);
    let foo_class = classification(&sync, foo);
    sync.store().link_content(1, foo_class).unwrap();

    let mut term = fetched(foo, 300, "Foo");
    term.ambiguous = true;
    term.use_terms.push(TermReference::new(400, "Foo (drink)"));
    term.use_terms.push(TermReference::new(401, "Foo (place)"));
    let report = sync.save(&term).unwrap();

    assert_eq!(report.propagation, Propagation::NotApplicable);
    assert_eq!(sync.store().content_for(foo_class).unwrap(), vec![1]);
    let record = sync.store().get_term(foo).unwrap().unwrap();
    assert_eq!(record.display_status(), DisplayStatus::Ambiguous);
    assert_eq!(sync.store().relationships_for(foo).unwrap().len(), 2);
}

#[test]
fn ambiguous_flag_can_be_cleared() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let foo = seed(&sync, "Foo", 300);

    let mut term = fetched(foo, 300, "Foo");
    term.ambiguous = true;
    sync.save(&term).unwrap();
    assert!(sync.store().get_term(foo).unwrap().unwrap().data.unwrap().ambiguous);

    term.ambiguous = false;
    sync.save(&term).unwrap();
    let record = sync.store().get_term(foo).unwrap().unwrap();
    assert!(!record.data.as_ref().unwrap().ambiguous);
    assert_eq!(record.display_status(), DisplayStatus::None);
}

#[test]
fn already_nonpreferred_term_does_not_repoint_again() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let foo = seed(&sync, "Foo", 300);

    let mut term = fetched(foo, 300, "Foo");
    term.use_terms.push(TermReference::new(400, "RealFoo"));
    sync.save(&term).unwrap();

    let foo_class = classification(&sync, foo);
    sync.store().link_content(9, foo_class).unwrap();
    let report = sync.save(&term).unwrap();

    assert_eq!(report.propagation, Propagation::NotApplicable);
    assert_eq!(sync.store().content_for(foo_class).unwrap(), vec![9]);
}

#[test]
fn missing_taxonomy_skips_relationships_but_saves_attributes() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let orphan = sync.store().insert_term("Orphan", "orphan", None).unwrap();

    let mut term = fetched(orphan, 800, "Orphan");
    term.scope_note = "Updated".to_string();
    term.broader.push(TermReference::new(500, "SuperBar"));
    let report = sync.save(&term).unwrap();

    assert!(report.relationships_skipped);
    assert_eq!(report.edges_written, 0);
    assert_eq!(sync.store().find_by_external_id(500).unwrap(), None);
    let record = sync.store().get_term(orphan).unwrap().unwrap();
    let data = record.data.unwrap();
    assert_eq!(data.external_id, 800);
    assert_eq!(data.scope_note, "Updated");
}

#[test]
fn new_record_creates_classified_local_term() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);

    let mut term = Term::new(900, "Fresh Term");
    term.taxonomy = Some(Taxonomy::PostTag);
    term.last_retrieved = 2_000;
    let report = sync.save(&term).unwrap();

    assert!(report.created);
    let record = sync.store().get_term(report.local_id).unwrap().unwrap();
    assert_eq!(record.slug, "fresh-term");
    assert!(record.is_preferred());
    assert_eq!(record.data.unwrap().last_retrieved, 2_000);
    assert_eq!(
        sync.store().classification_of(report.local_id).unwrap(),
        Some(Taxonomy::PostTag)
    );
}

#[test]
fn save_by_external_id_renames_existing_term() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let foo = seed(&sync, "Foo", 300);

    let mut term = Term::new(300, "Foo Renamed");
    term.last_retrieved = 2_000;
    let report = sync.save(&term).unwrap();

    assert_eq!(report.local_id, foo);
    assert!(!report.created);
    let record = sync.store().get_term(foo).unwrap().unwrap();
    assert_eq!(record.name, "Foo Renamed");
    assert_eq!(record.slug, "foo");
}

#[test]
fn save_rejects_remapping_external_id() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let foo = seed(&sync, "Foo", 300);

    let err = sync.save(&fetched(foo, 999, "Foo")).unwrap_err();
    assert!(matches!(
        err,
        SyncError::Repo(RepoError::ExternalIdConflict {
            existing: 300,
            incoming: 999,
            ..
        })
    ));
}

#[test]
fn mapping_conflict_leaves_name_unchanged() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let foo = seed(&sync, "Foo", 300);
    let local = sync.store().insert_term("Bar", "bar", None).unwrap();

    let err = sync.save(&fetched(foo, 999, "Foo Renamed")).unwrap_err();
    assert!(matches!(
        err,
        SyncError::Repo(RepoError::ExternalIdConflict { .. })
    ));

    let mut claim = fetched(local, 300, "Bar Renamed");
    claim.taxonomy = Some(Taxonomy::PostTag);
    let err = sync.save(&claim).unwrap_err();
    assert!(matches!(err, SyncError::Repo(RepoError::ExternalIdTaken(300))));

    let store = sync.store();
    assert_eq!(store.get_term(foo).unwrap().unwrap().name, "Foo");
    let bar = store.get_term(local).unwrap().unwrap();
    assert_eq!(bar.name, "Bar");
    assert!(bar.data.is_none());
    assert_eq!(store.classification_of(local).unwrap(), None);
}

#[test]
fn record_without_retrieval_time_is_not_a_placeholder() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);

    let mut term = Term::new(300, "Foo");
    term.taxonomy = Some(Taxonomy::Category);
    term.use_terms.push(TermReference::new(400, "RealFoo"));
    let report = sync.save(&term).unwrap();

    let record = sync.store().get_term(report.local_id).unwrap().unwrap();
    let data = record.data.as_ref().unwrap();
    assert!(!data.preferred);
    assert!(data.last_retrieved > 0);
    assert!(!data.is_placeholder());
    assert_eq!(record.display_status(), DisplayStatus::NonPreferred);
}

#[test]
fn deleted_placeholder_shows_deleted() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let bar = seed(&sync, "Bar", 200);

    let mut term = fetched(bar, 200, "Bar");
    term.broader.push(TermReference::new(500, "SuperBar"));
    sync.save(&term).unwrap();
    let super_bar = sync.store().find_by_external_id(500).unwrap().unwrap();

    sync.delete_term(super_bar).unwrap();

    let record = sync.store().get_term(super_bar).unwrap().unwrap();
    assert!(record.data.as_ref().unwrap().is_placeholder());
    assert_eq!(record.display_status(), DisplayStatus::Deleted);
}

#[test]
fn save_rejects_invalid_record() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);

    let err = sync.save(&Term::new(0, "Broken")).unwrap_err();
    assert!(matches!(
        err,
        SyncError::InvalidTerm(TermValidationError::InvalidExternalId(0))
    ));
    assert_eq!(count_rows(&conn, "terms"), 0);
}

#[test]
fn save_with_unknown_local_id_fails() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);

    let err = sync.save(&fetched(42, 300, "Foo")).unwrap_err();
    assert!(matches!(err, SyncError::Repo(RepoError::NotFound(42))));
}

#[test]
fn delete_term_marks_term_deleted() {
    let conn = open_db_in_memory().unwrap();
    let sync = synchronizer(&conn);
    let foo = seed(&sync, "Foo", 300);

    sync.delete_term(foo).unwrap();

    let record = sync.store().get_term(foo).unwrap().unwrap();
    assert_eq!(record.display_status(), DisplayStatus::Deleted);
}
