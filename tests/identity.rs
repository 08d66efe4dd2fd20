use std::sync::{Arc, Barrier};
use std::thread;

use chrono::NaiveDate;
use rusqlite::Connection;

use league_signals::identity::{
    self, CanonicalId, EntityAttributes, EntityType, MappingKey, NameIndex,
};
use league_signals::store::{self, with_unit_of_work};

const THRESHOLD: f64 = 0.7;

fn team(name: &str) -> EntityAttributes {
    EntityAttributes::Team {
        display_name: name.to_string(),
        abbreviation: None,
    }
}

fn player(first: &str, last: &str, born: Option<NaiveDate>) -> EntityAttributes {
    EntityAttributes::Player {
        first_name: first.to_string(),
        last_name: last.to_string(),
        position: None,
        birthdate: born,
    }
}

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

fn create(
    conn: &mut Connection,
    key: &MappingKey,
    attrs: &EntityAttributes,
    other: Option<&mut NameIndex>,
) -> Option<CanonicalId> {
    with_unit_of_work(conn, |uow| {
        identity::resolve_or_create(uow, key, attrs, other, THRESHOLD)
    })
    .unwrap()
}

#[test]
fn resolve_or_create_is_idempotent() {
    let mut conn = store::open_in_memory().unwrap();
    let key = MappingKey::new("espn", "nba", EntityType::Team, "2");

    let first = create(&mut conn, &key, &team("Boston Celtics"), None);
    let second = create(&mut conn, &key, &team("Boston Celtics"), None);
    assert!(first.is_some());
    assert_eq!(first, second);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM teams"), 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM provider_mapping"), 1);
}

#[test]
fn unknown_key_resolves_to_none() {
    let conn = store::open_in_memory().unwrap();
    let key = MappingKey::new("espn", "nba", EntityType::Team, "999");
    let found = identity::resolve(&conn, &key).unwrap();
    assert_eq!(found, None);
    assert_eq!(CanonicalId::or_not_found(found), CanonicalId::NOT_FOUND);
}

#[test]
fn exact_mapping_wins_over_a_name_match() {
    let mut conn = store::open_in_memory().unwrap();
    let espn = MappingKey::new("espn", "nba", EntityType::Team, "2");
    let yahoo = MappingKey::new("yahoo", "nba", EntityType::Team, "nba.t.2");
    let original = create(&mut conn, &espn, &team("Boston Celtics"), None).unwrap();
    let other = create(&mut conn, &yahoo, &team("Boston Celtics"), None).unwrap();
    assert_ne!(original, other);

    let mut index = NameIndex::new("yahoo");
    index.push("nba.t.2", "Boston Celtics", None);
    let again = create(&mut conn, &espn, &team("Boston Celtics"), Some(&mut index));
    assert_eq!(again, Some(original));
    assert_eq!(index.len(), 1);
}

#[test]
fn name_match_binds_to_an_already_mapped_counterpart() {
    let mut conn = store::open_in_memory().unwrap();
    let yahoo = MappingKey::new("yahoo", "nba", EntityType::Team, "nba.t.2");
    let existing = create(&mut conn, &yahoo, &team("Boston Celtics"), None).unwrap();

    let mut index = NameIndex::new("yahoo");
    index.push("nba.t.17", "Brooklyn Nets", None);
    index.push("nba.t.2", "Boston Celtics", None);
    let espn = MappingKey::new("espn", "nba", EntityType::Team, "2");
    let bound = create(&mut conn, &espn, &team("Boston Celtics"), Some(&mut index));

    assert_eq!(bound, Some(existing));
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM teams"), 1);
    assert_eq!(index.len(), 1);
}

#[test]
fn name_match_binds_an_unmapped_counterpart_to_the_new_entity() {
    let mut conn = store::open_in_memory().unwrap();
    let born = NaiveDate::from_ymd_opt(1998, 3, 3);
    let mut index = NameIndex::new("yahoo");
    index.push("nba.p.6014", "Jayson Tatum", born);

    let espn = MappingKey::new("espn", "nba", EntityType::Player, "4065648");
    let id = create(&mut conn, &espn, &player("Jayson", "Tatum", born), Some(&mut index)).unwrap();

    let yahoo = MappingKey::new("yahoo", "nba", EntityType::Player, "nba.p.6014");
    assert_eq!(identity::resolve(&conn, &yahoo).unwrap(), Some(id));
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM players"), 1);
}

#[test]
fn differing_birthdates_create_a_separate_player() {
    let mut conn = store::open_in_memory().unwrap();
    let mut index = NameIndex::new("yahoo");
    index.push("nba.p.1", "Jalen Williams", NaiveDate::from_ymd_opt(2001, 4, 14));

    let espn = MappingKey::new("espn", "nba", EntityType::Player, "77");
    let attrs = player("Jalen", "Williams", NaiveDate::from_ymd_opt(1997, 7, 29));
    create(&mut conn, &espn, &attrs, Some(&mut index)).unwrap();

    let yahoo = MappingKey::new("yahoo", "nba", EntityType::Player, "nba.p.1");
    assert_eq!(identity::resolve(&conn, &yahoo).unwrap(), None);
    assert_eq!(index.len(), 1);
}

#[test]
fn thin_attributes_create_nothing() {
    let mut conn = store::open_in_memory().unwrap();
    let key = MappingKey::new("espn", "nba", EntityType::Team, "44");
    assert_eq!(create(&mut conn, &key, &team("  "), None), None);

    let key = MappingKey::new("espn", "nba", EntityType::Player, "45");
    assert_eq!(create(&mut conn, &key, &player("Nene", "", None), None), None);

    assert_eq!(count(&conn, "SELECT COUNT(*) FROM teams"), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM players"), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM provider_mapping"), 0);
}

#[test]
fn mononym_binds_to_a_mapped_counterpart() {
    let mut conn = store::open_in_memory().unwrap();
    let yahoo = MappingKey::new("yahoo", "nba", EntityType::Player, "nba.p.88");
    let existing = create(&mut conn, &yahoo, &player("Nene", "Hilario", None), None).unwrap();

    let mut index = NameIndex::new("yahoo");
    index.push("nba.p.88", "Nene", None);
    let espn = MappingKey::new("espn", "nba", EntityType::Player, "1713");
    let bound = create(&mut conn, &espn, &player("Nene", "", None), Some(&mut index));

    assert_eq!(bound, Some(existing));
    assert!(index.is_empty());
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM players"), 1);
}

#[test]
fn mononym_without_a_mapped_counterpart_stays_unresolved() {
    let mut conn = store::open_in_memory().unwrap();
    let mut index = NameIndex::new("yahoo");
    index.push("nba.p.88", "Nene", None);
    let espn = MappingKey::new("espn", "nba", EntityType::Player, "1713");

    assert_eq!(create(&mut conn, &espn, &player("Nene", "", None), Some(&mut index)), None);
    assert_eq!(index.len(), 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM provider_mapping"), 0);
}

#[test]
fn name_match_never_merges_two_ids_from_one_provider() {
    let mut conn = store::open_in_memory().unwrap();
    let mut index = NameIndex::new("yahoo");
    index.push("y1", "Jalen Williams", None);
    let jalen = MappingKey::new("espn", "nba", EntityType::Player, "e1");
    let first = create(&mut conn, &jalen, &player("Jalen", "Williams", None), Some(&mut index)).unwrap();

    // A later event lists y1 again; e1 resolves exactly and leaves it unclaimed.
    let mut index = NameIndex::new("yahoo");
    index.push("y1", "Jalen Williams", None);
    let again = create(&mut conn, &jalen, &player("Jalen", "Williams", None), Some(&mut index));
    assert_eq!(again, Some(first));

    let jaylin = MappingKey::new("espn", "nba", EntityType::Player, "e2");
    let second = create(&mut conn, &jaylin, &player("Jaylin", "Williams", None), Some(&mut index)).unwrap();
    assert_ne!(first, second);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM players"), 2);
    let y1 = MappingKey::new("yahoo", "nba", EntityType::Player, "y1");
    assert_eq!(identity::resolve(&conn, &y1).unwrap(), Some(first));
}

#[test]
fn retain_unmapped_drops_settled_candidates() {
    let mut conn = store::open_in_memory().unwrap();
    let yahoo = MappingKey::new("yahoo", "nba", EntityType::Team, "nba.t.2");
    create(&mut conn, &yahoo, &team("Boston Celtics"), None).unwrap();

    let mut index = NameIndex::new("yahoo");
    index.push("nba.t.2", "Boston Celtics", None);
    index.push("nba.t.17", "Brooklyn Nets", None);
    assert_eq!(index.retain_unmapped(&conn, "nba", EntityType::Team).unwrap(), 1);
    assert_eq!(index.get(0).map(|c| c.local_id.as_str()), Some("nba.t.17"));
    // Mappings in another league do not count.
    let mut wnba = NameIndex::new("yahoo");
    wnba.push("nba.t.2", "Boston Celtics", None);
    assert_eq!(wnba.retain_unmapped(&conn, "wnba", EntityType::Team).unwrap(), 1);
}

#[test]
fn insert_or_get_keeps_the_first_binding() {
    let conn = store::open_in_memory().unwrap();
    let key = MappingKey::new("espn", "nba", EntityType::Team, "2");
    assert_eq!(
        identity::insert_or_get(&conn, &key, CanonicalId(5)).unwrap(),
        CanonicalId(5)
    );
    assert_eq!(
        identity::insert_or_get(&conn, &key, CanonicalId(9)).unwrap(),
        CanonicalId(5)
    );
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM provider_mapping"), 1);
}

#[test]
fn mappings_are_scoped_by_league() {
    let mut conn = store::open_in_memory().unwrap();
    let nba = MappingKey::new("espn", "nba", EntityType::Team, "2");
    let wnba = MappingKey::new("espn", "wnba", EntityType::Team, "2");
    let a = create(&mut conn, &nba, &team("Boston Celtics"), None);
    let b = create(&mut conn, &wnba, &team("Boston Celtics"), None);
    assert_ne!(a, b);
}

#[test]
fn concurrent_resolvers_agree_on_one_entity() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("signals.sqlite");
    store::open_db(&db_path).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles = (0..2)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let db_path = db_path.clone();
            thread::spawn(move || {
                let mut conn = store::open_db(&db_path).unwrap();
                let key = MappingKey::new("espn", "nba", EntityType::Team, "2");
                barrier.wait();
                with_unit_of_work(&mut conn, |uow| {
                    identity::resolve_or_create(uow, &key, &team("Boston Celtics"), None, THRESHOLD)
                })
                .unwrap()
            })
        })
        .collect::<Vec<_>>();
    let ids = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect::<Vec<_>>();

    assert!(ids[0].is_some());
    assert_eq!(ids[0], ids[1]);
    let conn = store::open_db(&db_path).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM teams"), 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM provider_mapping"), 1);
}
