use shelter_core::bson::{doc, oid::ObjectId, Bson, Document};
use shelter_core::db::open_db_in_memory;
use shelter_core::{
    AnimalShelter, DocumentCollection, InsertOutcome, RepoError, RepoResult, SequencePolicy,
    ShelterError, SqliteCollection, UpdateOutcome, NOTHING_DELETED,
};
use std::cell::RefCell;

fn shelter(conn: &rusqlite::Connection) -> AnimalShelter<SqliteCollection<'_>> {
    AnimalShelter::new(SqliteCollection::try_new(conn, "animals").unwrap())
}

fn rec_nums(records: &[Document]) -> Vec<i64> {
    records
        .iter()
        .map(|record| record.get_i64("rec_num").unwrap())
        .collect()
}

#[test]
fn shelter_intake_scenario() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);

    assert!(shelter
        .create(doc! { "name": "Rex", "animal_type": "Dog" })
        .unwrap());
    assert!(shelter.create(doc! { "name": "Fido" }).unwrap());

    let rex = shelter.read(doc! { "name": "Rex" }).unwrap();
    assert_eq!(rec_nums(&rex), vec![1]);
    let fido = shelter.read(doc! { "name": "Fido" }).unwrap();
    assert_eq!(rec_nums(&fido), vec![2]);

    let modified = shelter
        .update(
            doc! { "name": "Rex" },
            doc! { "$set": { "animal_type": "Cat" } },
        )
        .unwrap();
    assert_eq!(modified, 1);

    assert_eq!(shelter.delete(doc! { "name": "Ghost" }).unwrap(), NOTHING_DELETED);
    assert_eq!(shelter.delete(doc! { "name": "Fido" }).unwrap(), 1);

    let remaining = shelter.read(doc! {}).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].get_str("animal_type").unwrap(), "Cat");
}

#[test]
fn rec_num_sequence_overwrites_client_values() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);

    for (index, client_rec_num) in [500_i64, -3, 1, 1].into_iter().enumerate() {
        let name = format!("animal-{index}");
        assert!(shelter
            .create(doc! { "name": name, "rec_num": client_rec_num })
            .unwrap());
    }

    let records = shelter.read(doc! {}).unwrap();
    assert_eq!(rec_nums(&records), vec![1, 2, 3, 4]);
    assert_eq!(shelter.next_record_num().unwrap(), 5);
}

#[test]
fn create_never_persists_client_identifier() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);
    let client_id = ObjectId::new();

    let id = shelter
        .create_record(doc! { "_id": client_id, "name": "Rex" })
        .unwrap()
        .expect("insert should be acknowledged");

    assert!(matches!(id, Bson::ObjectId(_)));
    assert_ne!(id, Bson::ObjectId(client_id));
    assert!(shelter.read(doc! { "_id": client_id }).unwrap().is_empty());
}

#[test]
fn create_then_read_by_id_round_trips() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);

    let input = doc! {
        "name": "Rex",
        "animal_type": "Dog",
        "breed": "Beagle",
        "age_upon_outcome": "2 years",
        "location": { "lat": 30.75, "long": -97.48 },
    };
    let id = shelter.create_record(input.clone()).unwrap().unwrap();

    let found = shelter.read(doc! { "_id": id.clone() }).unwrap();
    assert_eq!(found.len(), 1);

    let mut expected = doc! { "_id": id };
    for (key, value) in input {
        expected.insert(key, value);
    }
    expected.insert("rec_num", 1_i64);
    assert_eq!(found[0], expected);
}

#[test]
fn read_distinguishes_no_matches_from_query_errors() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);
    shelter.create(doc! { "name": "Rex" }).unwrap();

    let none = shelter.read(doc! { "name": "Nobody" }).unwrap();
    assert!(none.is_empty());

    let err = shelter
        .read(doc! { "name": { "$bogus": 1 } })
        .unwrap_err();
    assert!(matches!(err, ShelterError::Query(RepoError::InvalidQuery(_))));
}

#[test]
fn read_returns_records_in_insertion_order() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);
    for name in ["Luna", "Max", "Bella"] {
        shelter.create(doc! { "name": name, "animal_type": "Cat" }).unwrap();
    }

    let cats = shelter.read(doc! { "animal_type": "Cat" }).unwrap();
    let names: Vec<&str> = cats
        .iter()
        .map(|record| record.get_str("name").unwrap())
        .collect();
    assert_eq!(names, vec!["Luna", "Max", "Bella"]);
}

#[test]
fn update_counts_only_records_that_changed() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);
    shelter.create(doc! { "name": "A", "animal_type": "Dog", "outcome": "Adoption" }).unwrap();
    shelter.create(doc! { "name": "B", "animal_type": "Dog", "outcome": "Transfer" }).unwrap();
    shelter.create(doc! { "name": "C", "animal_type": "Dog", "outcome": "Adoption" }).unwrap();
    shelter.create(doc! { "name": "D", "animal_type": "Cat", "outcome": "Transfer" }).unwrap();

    let modified = shelter
        .update(
            doc! { "animal_type": "Dog" },
            doc! { "$set": { "outcome": "Adoption" } },
        )
        .unwrap();
    assert_eq!(modified, 1);

    let adopted = shelter.read(doc! { "outcome": "Adoption" }).unwrap();
    assert_eq!(adopted.len(), 3);
}

#[test]
fn failed_update_leaves_collection_unchanged() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);
    shelter.create(doc! { "name": "A", "weight": 10 }).unwrap();
    shelter.create(doc! { "name": "B", "weight": "unknown" }).unwrap();

    let err = shelter
        .update(doc! {}, doc! { "$inc": { "weight": 1 } })
        .unwrap_err();
    assert!(matches!(err, ShelterError::Query(RepoError::InvalidUpdate(_))));

    let first = shelter.read(doc! { "name": "A" }).unwrap();
    assert_eq!(first[0].get_i32("weight").unwrap(), 10);
}

#[test]
fn update_rejects_replacement_documents() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);
    shelter.create(doc! { "name": "Rex" }).unwrap();

    let err = shelter
        .update(doc! { "name": "Rex" }, doc! { "name": "Max" })
        .unwrap_err();
    assert!(matches!(err, ShelterError::Query(RepoError::InvalidUpdate(_))));
}

#[test]
fn delete_removes_all_matches() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);
    for name in ["Rex", "Max", "Rex"] {
        shelter.create(doc! { "name": name }).unwrap();
    }

    assert_eq!(shelter.delete(doc! { "name": "Rex" }).unwrap(), 2);
    assert!(shelter.read(doc! { "name": "Rex" }).unwrap().is_empty());
    assert_eq!(shelter.read(doc! {}).unwrap().len(), 1);
    assert_eq!(shelter.delete(doc! { "name": "Rex" }).unwrap(), NOTHING_DELETED);
}

#[test]
fn delete_with_malformed_query_is_an_error_not_a_sentinel() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);

    let err = shelter
        .delete(doc! { "name": { "$in": "Rex" } })
        .unwrap_err();
    assert!(matches!(err, ShelterError::Query(RepoError::InvalidQuery(_))));

    let err = shelter
        .delete(doc! { "$where": "this.name == 'Rex'" })
        .unwrap_err();
    assert!(matches!(err, ShelterError::Query(RepoError::Unsupported(_))));
}

#[test]
fn read_matches_regular_expressions() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);
    shelter.create(doc! { "name": "Rex", "breed": "Labrador Retriever Mix" }).unwrap();
    shelter.create(doc! { "name": "Max", "breed": "Chihuahua Shorthair" }).unwrap();

    let labs = shelter
        .read(doc! { "breed": { "$regex": "Labrador" } })
        .unwrap();
    assert_eq!(labs.len(), 1);
    assert_eq!(labs[0].get_str("name").unwrap(), "Rex");

    let short = shelter
        .read(doc! { "breed": { "$regex": "shorthair$", "$options": "i" } })
        .unwrap();
    assert_eq!(short.len(), 1);
    assert_eq!(short[0].get_str("name").unwrap(), "Max");
}

#[test]
fn update_sets_array_elements_by_index() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);
    shelter.create(doc! { "name": "Rex", "tags": ["a", "c"] }).unwrap();

    let modified = shelter
        .update(doc! { "name": "Rex" }, doc! { "$set": { "tags.0": "b" } })
        .unwrap();
    assert_eq!(modified, 1);

    let rex = shelter.read(doc! { "name": "Rex" }).unwrap();
    assert_eq!(rex[0].get_array("tags").unwrap(), &vec![Bson::from("b"), Bson::from("c")]);
}

#[test]
fn unsupported_update_modifier_is_a_query_error() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);
    shelter.create(doc! { "name": "Rex", "tags": [] }).unwrap();

    let err = shelter
        .update(doc! { "name": "Rex" }, doc! { "$push": { "tags": "calm" } })
        .unwrap_err();
    assert!(matches!(err, ShelterError::Query(RepoError::Unsupported(_))));
    assert_eq!(shelter.read(doc! {}).unwrap()[0].get_array("tags").unwrap().len(), 0);
}

#[test]
fn missing_arguments_are_rejected_before_reaching_the_store() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);

    let cases = [
        shelter.create(None::<Document>).map(|_| ()),
        shelter.create(Bson::String("Rex".to_string())).map(|_| ()),
        shelter.read(Bson::Null).map(|_| ()),
        shelter
            .update(None::<Document>, doc! { "$set": { "name": "Max" } })
            .map(|_| ()),
        shelter.update(doc! { "name": "Rex" }, None::<Document>).map(|_| ()),
        shelter.delete(None::<Document>).map(|_| ()),
    ];
    for result in cases {
        assert!(matches!(result, Err(ShelterError::InvalidArgument(_))));
    }

    assert!(shelter.collection().find(doc! {}).unwrap().is_empty());
}

#[test]
fn start_at_one_policy_allocates_one_for_empty_collection() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);

    assert_eq!(shelter.sequence_policy(), SequencePolicy::StartAtOne);
    assert_eq!(shelter.next_record_num().unwrap(), 1);
}

#[test]
fn strict_policy_fails_allocation_without_existing_rec_num() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn).with_sequence_policy(SequencePolicy::Strict);

    assert!(matches!(
        shelter.next_record_num(),
        Err(ShelterError::Allocation(_))
    ));
    assert!(matches!(
        shelter.create(doc! { "name": "Rex" }),
        Err(ShelterError::Allocation(_))
    ));
    assert!(shelter.collection().find(doc! {}).unwrap().is_empty());

    shelter
        .collection()
        .insert_one(doc! { "name": "legacy import" })
        .unwrap();
    assert!(matches!(
        shelter.next_record_num(),
        Err(ShelterError::Allocation(_))
    ));

    shelter
        .collection()
        .insert_one(doc! { "name": "seeded", "rec_num": 7 })
        .unwrap();
    assert_eq!(shelter.next_record_num().unwrap(), 8);
    assert!(shelter.create(doc! { "name": "Rex" }).unwrap());
    assert_eq!(
        rec_nums(&shelter.read(doc! { "name": "Rex" }).unwrap()),
        vec![8]
    );
}

#[test]
fn allocation_rejects_non_integral_maximum() {
    let conn = open_db_in_memory().unwrap();
    let shelter = shelter(&conn);
    shelter
        .collection()
        .insert_one(doc! { "name": "odd", "rec_num": 2.5 })
        .unwrap();

    assert!(matches!(
        shelter.next_record_num(),
        Err(ShelterError::Allocation(_))
    ));
}

/// Collection that refuses every insert, the way a server reports a
/// rejected write.
#[derive(Default)]
struct RefusingCollection {
    attempted: RefCell<Vec<Document>>,
}

impl DocumentCollection for RefusingCollection {
    fn name(&self) -> &str {
        "refusing"
    }

    fn max_value(&self, _field: &str) -> RepoResult<Option<Bson>> {
        Ok(Some(Bson::Int64(41)))
    }

    fn insert_one(&self, document: Document) -> RepoResult<InsertOutcome> {
        self.attempted.borrow_mut().push(document);
        Ok(InsertOutcome::Unacknowledged)
    }

    fn find(&self, _filter: Document) -> RepoResult<Vec<Document>> {
        Ok(Vec::new())
    }

    fn update_many(&self, _filter: Document, _update: Document) -> RepoResult<UpdateOutcome> {
        Ok(UpdateOutcome::default())
    }

    fn delete_many(&self, _filter: Document) -> RepoResult<u64> {
        Ok(0)
    }
}

#[test]
fn unacknowledged_insert_returns_false_instead_of_an_error() {
    let shelter = AnimalShelter::new(RefusingCollection::default());

    assert!(!shelter
        .create(doc! { "_id": "A700", "name": "Rex" })
        .unwrap());
    assert_eq!(shelter.create_record(doc! { "name": "Max" }).unwrap(), None);

    let attempted = shelter.collection().attempted.borrow();
    assert_eq!(attempted.len(), 2);
    assert_eq!(attempted[0], doc! { "name": "Rex", "rec_num": 42_i64 });
    assert_eq!(attempted[1], doc! { "name": "Max", "rec_num": 42_i64 });
}
