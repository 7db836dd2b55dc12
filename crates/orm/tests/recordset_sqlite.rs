//! Record and recordset behaviour against in-memory SQLite

mod common;

use common::{count, setup};
use elif_recordset::{FieldValue, Limit, ModelError, OrderBy, Record, RecordSet, Search, Where};
use serde_json::json;
use serial_test::serial;

fn bound_library() -> (elif_recordset::Connector, common::SqlLog) {
    let (db, log) = setup();
    RecordSet::bind(&db, "author").unwrap();
    (db, log)
}

fn ids_of(value: &FieldValue) -> Vec<i64> {
    let mut ids = value.as_set().expect("related set").ids();
    ids.sort_unstable();
    ids
}

#[test]
#[serial]
fn test_nested_insert_resolves_ids_at_every_level() {
    let (db, _log) = bound_library();
    let authors = RecordSet::new(&db, "author").unwrap();
    let author = authors
        .insert([json!({
            "name": "Ursula",
            "books": [
                {"title": "The Dispossessed", "tags": [{"name": "utopia"}, {"name": "classic"}]},
                {"title": "Lathe of Heaven"}
            ]
        })])
        .unwrap()
        .remove(0);

    let author_id = author.id().unwrap();
    let books = RecordSet::new(&db, "book").unwrap();
    books.select(Search::and().with("author", author_id)).unwrap();
    assert_eq!(books.len(), 2);

    let dispossessed = books
        .iter()
        .find(|b| b.raw("title") == FieldValue::from("The Dispossessed"))
        .unwrap();
    let tags = dispossessed.get("tags").unwrap();
    assert_eq!(tags.as_set().unwrap().len(), 2);

    // the junction reads the same from the other side
    let tag = tags.as_set().unwrap().first().unwrap();
    let fresh = Record::find(&db, "tag", tag.id().unwrap(), &[]).unwrap().unwrap();
    assert_eq!(ids_of(&fresh.get("books").unwrap()), vec![dispossessed.id().unwrap()]);
}

#[test]
#[serial]
fn test_select_accumulates_without_duplicates() {
    let (db, _log) = bound_library();
    let authors = RecordSet::new(&db, "author").unwrap();
    authors
        .insert([json!({"name": "Ann"}), json!({"name": "Bob"}), json!({"name": "Cy"})])
        .unwrap();

    let view = RecordSet::new(&db, "author").unwrap();
    view.select(Where::Name("Ann".to_string())).unwrap();
    view.select(Where::All).unwrap();
    view.select(Where::All).unwrap();
    assert_eq!(view.len(), 3);

    let ordered = RecordSet::new(&db, "author").unwrap();
    ordered
        .select_with(Where::All, &[OrderBy::desc("name")], Some(Limit::new(0, 2)))
        .unwrap();
    assert_eq!(
        ordered.pluck("name").unwrap(),
        vec![FieldValue::from("Cy"), FieldValue::from("Bob")]
    );
}

#[test]
#[serial]
fn test_replacing_one_to_many_orphans_nullable_rows() {
    let (db, _log) = bound_library();
    let author = Record::add(
        &db,
        "author",
        json!({"name": "Ann", "books": [{"title": "One"}, {"title": "Two"}]}),
    )
    .unwrap();
    let kept = Record::find(&db, "book", Search::and().with("title", "Two"), &[])
        .unwrap()
        .unwrap();

    author.update(json!({"books": [kept.id().unwrap()]})).unwrap();

    let one = Record::find(&db, "book", Search::and().with("title", "One"), &[])
        .unwrap()
        .expect("orphaned row is kept");
    assert!(one.raw("author").is_null());

    let fresh = Record::find(&db, "author", "Ann", &[]).unwrap().unwrap();
    assert_eq!(ids_of(&fresh.get("books").unwrap()), vec![kept.id().unwrap()]);
}

#[test]
#[serial]
fn test_select_by_id_returns_one_record() {
    let (db, _log) = bound_library();
    let books = RecordSet::new(&db, "book").unwrap();
    books.insert([json!({"title": "A"}), json!({"title": "B"})]).unwrap();
    let id = books.ids()[1];

    let one = RecordSet::new(&db, "book").unwrap();
    one.select(id).unwrap();
    one.select(id).unwrap();
    assert_eq!(one.ids(), vec![id]);
}

#[test]
#[serial]
fn test_mixed_update_keeps_inserted_and_selected_rows() {
    let (db, _log) = bound_library();
    let old = Record::add(&db, "tag", json!({"name": "old"})).unwrap();
    let kept = Record::add(&db, "tag", json!({"name": "kept"})).unwrap();
    let book = Record::add(
        &db,
        "book",
        json!({"title": "Mix", "tags": [old.id().unwrap(), kept.id().unwrap()]}),
    )
    .unwrap();

    book.update(json!({"tags": [kept.id().unwrap(), {"name": "new"}]})).unwrap();

    let fresh = Record::find(&db, "book", book.id().unwrap(), &[]).unwrap().unwrap();
    let tags = fresh.get("tags").unwrap();
    let mut names: Vec<String> = tags
        .as_set()
        .unwrap()
        .pluck("name")
        .unwrap()
        .iter()
        .filter_map(|name| name.as_str().map(String::from))
        .collect();
    names.sort();
    assert_eq!(names, vec!["kept", "new"]);
}

#[test]
#[serial]
fn test_existing_children_are_linked_after_parent_insert() {
    let (db, _log) = bound_library();
    let loose = Record::add(&db, "book", json!({"title": "Loose"})).unwrap();

    let author = Record::add(&db, "author", json!({"name": "Ann", "books": [loose.id().unwrap()]})).unwrap();

    let fresh = Record::find(&db, "book", loose.id().unwrap(), &[]).unwrap().unwrap();
    assert_eq!(fresh.raw("author").as_i64(), author.id());
}

#[test]
#[serial]
fn test_replacing_required_one_to_many_deletes_rows() {
    let (db, log) = bound_library();
    let book = Record::add(
        &db,
        "book",
        json!({"title": "Atlas", "chapters": [{"title": "I"}, {"title": "II"}]}),
    )
    .unwrap();

    book.update(json!({"chapters": [{"title": "III"}]})).unwrap();

    assert_eq!(count(&log, "ROLLBACK TO SAVEPOINT"), 1);
    let chapters = RecordSet::new(&db, "chapter").unwrap();
    chapters.select(Where::All).unwrap();
    assert_eq!(chapters.pluck("title").unwrap(), vec![FieldValue::from("III")]);
}

#[test]
#[serial]
fn test_empty_list_clears_many_to_many() {
    let (db, _log) = bound_library();
    let book = Record::add(&db, "book", json!({"title": "Dune", "tags": [{"name": "sf"}]})).unwrap();
    assert_eq!(book.get("tags").unwrap().as_set().unwrap().len(), 1);

    book.update(json!({"tags": []})).unwrap();

    let fresh = Record::find(&db, "book", book.id().unwrap(), &[]).unwrap().unwrap();
    assert!(fresh.get("tags").unwrap().as_set().unwrap().is_empty());
    assert!(Record::find(&db, "tag", "sf", &[]).unwrap().is_some());
}

#[test]
#[serial]
fn test_selecting_into_related_set_links_rows() {
    let (db, _log) = bound_library();
    let author = Record::add(&db, "author", json!({"name": "Ann"})).unwrap();
    let loose = Record::add(&db, "book", json!({"title": "Loose"})).unwrap();

    let books = author.get("books").unwrap();
    let books = books.as_set().unwrap();
    assert!(matches!(books.select(Where::All), Err(ModelError::Query(_))));
    books.select(loose.id().unwrap()).unwrap();

    let fresh = Record::find(&db, "book", loose.id().unwrap(), &[]).unwrap().unwrap();
    assert_eq!(fresh.raw("author").as_i64(), author.id());
}

#[test]
#[serial]
fn test_relation_values_are_memoized() {
    let (db, log) = bound_library();
    Record::add(&db, "book", json!({"title": "Emma", "author": {"name": "Jane"}})).unwrap();

    let book = Record::find(&db, "book", Search::and().with("title", "Emma"), &[])
        .unwrap()
        .unwrap();
    let before = count(&log, "SELECT");
    let first = book.get("author").unwrap();
    let second = book.get("author").unwrap();
    assert_eq!(count(&log, "SELECT"), before + 1);
    assert!(first.as_record().unwrap().ptr_eq(second.as_record().unwrap()));
    assert_eq!(first.as_record().unwrap().get("name").unwrap(), FieldValue::from("Jane"));
}

#[test]
#[serial]
fn test_update_batches_unless_computed() {
    let (db, log) = bound_library();
    let books = RecordSet::new(&db, "book").unwrap();
    books
        .insert([json!({"title": "A"}), json!({"title": "B"}), json!({"title": "C"})])
        .unwrap();

    let before = count(&log, "UPDATE");
    books.update(json!({"price": 9.5})).unwrap();
    assert_eq!(count(&log, "UPDATE"), before + 1);

    books.update(json!({"code": "abc"})).unwrap();
    assert_eq!(count(&log, "UPDATE"), before + 4);

    let fresh = Record::find(&db, "book", Search::and().with("title", "B"), &[]).unwrap().unwrap();
    assert_eq!(fresh.get("code").unwrap(), FieldValue::from("ABC"));
    assert_eq!(fresh.get("price").unwrap(), FieldValue::from(9.5));
}

#[test]
#[serial]
fn test_readonly_and_required_fields() {
    let (db, _log) = bound_library();
    let author = Record::add(&db, "author", json!({"name": "Ann"})).unwrap();
    assert!(matches!(author.update(json!({"id": 99})), Err(ModelError::Validation(_))));

    let books = RecordSet::new(&db, "book").unwrap();
    assert!(matches!(books.insert([json!({"price": 1})]), Err(ModelError::Validation(_))));
}

#[test]
#[serial]
fn test_failed_insert_leaves_set_unchanged() {
    let (db, _log) = bound_library();
    let books = RecordSet::new(&db, "book").unwrap();
    books.insert([json!({"title": "Kept"})]).unwrap();

    assert!(books.insert([json!({"title": "Also"}), json!({"price": 1})]).is_err());
    assert_eq!(books.len(), 1);
    assert!(books.iter().all(|book| !book.is_new()));

    books.update(json!({"price": 2})).unwrap();
    let fresh = Record::find(&db, "book", books.ids()[0], &[]).unwrap().unwrap();
    assert_eq!(fresh.get("price").unwrap(), FieldValue::from(2.0));
}

#[test]
#[serial]
fn test_related_set_rejects_unrestricted_select() {
    let (db, _log) = bound_library();
    let ann = Record::add(&db, "author", json!({"name": "Ann"})).unwrap();
    let bob = Record::add(
        &db,
        "author",
        json!({"name": "Bob", "books": [{"title": "B1"}, {"title": "B2"}]}),
    )
    .unwrap();

    let books = ann.get("books").unwrap();
    let books = books.as_set().unwrap();
    for filter in [
        Where::All,
        Where::Search(Search::and()),
        Where::Search(Search::or().group(Search::and())),
        Where::from_json(&json!({})).unwrap(),
    ] {
        assert!(matches!(books.select(filter), Err(ModelError::Query(_))));
    }
    assert!(books.is_empty());

    let fresh = Record::find(&db, "author", bob.id().unwrap(), &[]).unwrap().unwrap();
    assert_eq!(fresh.get("books").unwrap().as_set().unwrap().len(), 2);
}

#[test]
#[serial]
fn test_replacing_children_leaves_other_parents_alone() {
    let (db, _log) = bound_library();
    let ann = Record::add(
        &db,
        "author",
        json!({"name": "Ann", "books": [{"title": "A1"}, {"title": "A2"}]}),
    )
    .unwrap();
    let bob = Record::add(&db, "author", json!({"name": "Bob", "books": [{"title": "B1"}]})).unwrap();
    let b1 = Record::find(&db, "book", Search::and().with("title", "B1"), &[])
        .unwrap()
        .unwrap();

    ann.update(json!({"books": [{"title": "A3"}]})).unwrap();

    let fresh = Record::find(&db, "book", b1.id().unwrap(), &[]).unwrap().unwrap();
    assert_eq!(fresh.raw("author").as_i64(), bob.id());
    let fresh_ann = Record::find(&db, "author", ann.id().unwrap(), &[]).unwrap().unwrap();
    assert_eq!(fresh_ann.get("books").unwrap().as_set().unwrap().len(), 1);
}

#[test]
#[serial]
fn test_many_to_one_mismatch_is_rejected() {
    let (db, _log) = bound_library();
    let tag = Record::add(&db, "tag", json!({"name": "x"})).unwrap();
    let result = Record::add(&db, "book", [("title", FieldValue::from("T")), ("author", FieldValue::from(tag))]);
    assert!(matches!(result, Err(ModelError::Relationship(_))));
}

#[test]
#[serial]
fn test_filter_delete_flushes_origin() {
    let (db, _log) = bound_library();
    let books = RecordSet::new(&db, "book").unwrap();
    books
        .insert([json!({"title": "A"}), json!({"title": "B"}), json!({"title": "C"})])
        .unwrap();

    let cheap = books.filter(|r, _| r.raw("title") != FieldValue::from("B"), true);
    assert_eq!(cheap.len(), 2);
    cheap.delete().unwrap();

    assert!(cheap.is_empty());
    assert_eq!(books.pluck("title").unwrap(), vec![FieldValue::from("B")]);
    let all = RecordSet::new(&db, "book").unwrap();
    assert_eq!(all.select(Where::All).unwrap().len(), 1);
}

#[test]
#[serial]
fn test_map_and_set_methods() {
    let (db, _log) = bound_library();
    let authors = RecordSet::new(&db, "author").unwrap();
    authors
        .insert([
            json!({"name": "Ann", "books": [{"title": "A1"}, {"title": "A2"}]}),
            json!({"name": "Bob", "books": [{"title": "B1"}]}),
        ])
        .unwrap();

    let books = authors.map("books").unwrap();
    assert_eq!(books.len(), 3);
    assert!(authors.map("name").is_err());

    let titles = books.call("titles", Vec::new()).unwrap();
    assert_eq!(titles.as_json().unwrap().as_array().unwrap().len(), 3);

    let owners = books.map("author").unwrap();
    assert_eq!(owners.len(), 2);
}

#[test]
#[serial]
fn test_to_json_depth() {
    let (db, _log) = bound_library();
    let book = Record::add(&db, "book", json!({"title": "Emma", "author": {"name": "Jane"}})).unwrap();
    let author_id = book.get("author").unwrap().as_record().unwrap().id().unwrap();

    let flat = book.to_json(0);
    assert_eq!(flat["title"], json!("Emma"));
    assert_eq!(flat["author"], json!(author_id));

    let nested = book.to_json(1);
    assert_eq!(nested["author"]["name"], json!("Jane"));
}

#[test]
#[serial]
fn test_delegate_reads_updates_and_cascades() {
    let (db, _log) = setup();
    RecordSet::bind(&db, "employee").unwrap();

    let employee = Record::add(&db, "employee", json!({"name": "Bob", "salary": 10})).unwrap();
    assert_eq!(employee.get("name").unwrap(), FieldValue::from("Bob"));
    let person_id = employee.get("person").unwrap().as_record().unwrap().id().unwrap();

    employee.update(json!({"name": "Rob", "salary": 12})).unwrap();
    let person = Record::find(&db, "person", person_id, &[]).unwrap().unwrap();
    assert_eq!(person.get("name").unwrap(), FieldValue::from("Rob"));

    employee.delete().unwrap();
    assert!(Record::find(&db, "person", person_id, &[]).unwrap().is_none());
}

#[test]
#[serial]
fn test_deferred_insert_rolls_back_with_transaction() {
    let (db, _log) = bound_library();
    Record::add(&db, "author", json!({"name": "Ann", "books": [{"title": "A"}]})).unwrap();
    assert!(db.rollback().unwrap());
    db.begin().unwrap();

    let books = RecordSet::new(&db, "book").unwrap();
    assert!(books.select(Where::All).unwrap().is_empty());
}
