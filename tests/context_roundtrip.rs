//! Integration tests for context fetch/insert/remove/query round trips.

mod common;

use common::{in_memory_storage, user, User};
use strata::{Context, FetchRequest, Requestable, SortDescriptor, Storage, StorageError, Value};

#[test]
fn test_insert_save_fetch_round_trip() {
    let storage = in_memory_storage();
    let main = storage.main_context();

    let mut john = user("John", 25);
    main.insert(&mut john).unwrap();
    main.save().unwrap();

    let results = storage.request::<User>().fetch().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "John");
    assert_eq!(results[0].age, 25);
}

#[test]
fn test_remove_two_of_three_leaves_middle() {
    let storage = in_memory_storage();
    let main = storage.main_context();

    let mut a = user("A", 1);
    let mut b = user("B", 2);
    let mut c = user("C", 3);
    main.insert(&mut a).unwrap();
    main.insert(&mut b).unwrap();
    main.insert(&mut c).unwrap();
    main.save().unwrap();

    main.remove_all(&[a, c]).unwrap();
    main.save().unwrap();

    let results = storage.request::<User>().fetch().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "B");
}

#[test]
fn test_filtered_fetch_and_fetch_one() {
    let storage = in_memory_storage();
    let main = storage.main_context();

    for (name, age) in [("John", 25), ("Jane", 30), ("Joe", 35)] {
        let mut u = user(name, age);
        main.insert(&mut u).unwrap();
    }
    main.save().unwrap();

    let request = storage.request::<User>().filtered_key_eq("name", "Jane");
    let results = request.fetch().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].age, 30);

    let one = storage
        .request::<User>()
        .filtered_key_in("name", vec!["John", "Joe"])
        .sorted_by_key("age", true)
        .fetch_one()
        .unwrap()
        .unwrap();
    assert_eq!(one.name, "John");

    let none = storage
        .request::<User>()
        .filtered_key_eq("name", "Nobody")
        .fetch_one()
        .unwrap();
    assert!(none.is_none());
}

#[test]
fn test_sorted_offset_limit_pagination() {
    let storage = in_memory_storage();
    let main = storage.main_context();

    for age in 1..=5 {
        let mut u = user(&format!("U{}", age), age);
        main.insert(&mut u).unwrap();
    }
    main.save().unwrap();

    let page = storage
        .request::<User>()
        .sorted(SortDescriptor::descending("age"))
        .offset(1)
        .limit(2)
        .fetch()
        .unwrap();
    let ages: Vec<i64> = page.iter().map(|u| u.age).collect();
    assert_eq!(ages, vec![4, 3]);
}

#[test]
fn test_query_projects_attributes() {
    let storage = in_memory_storage();
    let main = storage.main_context();

    let mut john = user("John", 25);
    main.insert(&mut john).unwrap();
    main.save().unwrap();

    let request = storage.request::<User>();
    let records = request.query(&["name"]).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("name"), Some(&Value::String("John".into())));
    assert!(records[0].get("age").is_none());

    let one = request.query_one(&["name", "age"]).unwrap().unwrap();
    assert_eq!(one.get("age"), Some(&Value::Integer(25)));
}

#[test]
fn test_query_values_and_distinct_set() {
    let storage = in_memory_storage();
    let main = storage.main_context();

    for (name, age) in [("John", 25), ("John", 26), ("Jane", 30)] {
        let mut u = user(name, age);
        main.insert(&mut u).unwrap();
    }
    main.save().unwrap();

    let request = storage.request::<User>();
    let mut values = request.query_values("name").unwrap();
    values.sort();
    assert_eq!(values, vec!["Jane", "John", "John"]);

    let distinct = request.query_set("name").unwrap();
    assert_eq!(distinct.len(), 2);
    assert!(distinct.contains("John"));
    assert!(distinct.contains("Jane"));
}

#[test]
fn test_count_ignores_sort_and_limit() {
    let storage = in_memory_storage();
    let main = storage.main_context();

    for age in 1..=4 {
        let mut u = user(&format!("U{}", age), age);
        main.insert(&mut u).unwrap();
    }
    main.save().unwrap();

    let request = storage
        .request::<User>()
        .sorted_by_key("age", false)
        .limit(2);
    assert_eq!(request.count(), 4);
}

#[test]
fn test_unbound_request_behavior() {
    let request = FetchRequest::<User>::new();
    assert_eq!(request.count(), 0);
    assert!(matches!(
        request.fetch(),
        Err(StorageError::ContextRequired)
    ));
    assert!(matches!(
        request.query_values("name"),
        Err(StorageError::ContextRequired)
    ));
}

#[test]
fn test_repeated_remove_is_idempotent() {
    let storage = in_memory_storage();
    let main = storage.main_context();

    let mut john = user("John", 25);
    main.insert(&mut john).unwrap();
    main.save().unwrap();

    let saved = storage.request::<User>().fetch_one().unwrap().unwrap();
    main.remove(&saved).unwrap();
    main.save().unwrap();
    assert_eq!(storage.request::<User>().count(), 0);

    main.remove(&saved).unwrap();
    main.save().unwrap();
    assert_eq!(storage.request::<User>().count(), 0);
}

#[tokio::test]
async fn test_async_operations_match_sync() {
    let storage = in_memory_storage();
    let main = storage.main_context();

    let mut john = user("AsyncUser", 50);
    main.insert_async(&mut john).await.unwrap();
    main.save_to_persistent_store_async().await.unwrap();

    let request = storage.request::<User>();
    let results = request.fetch_async().await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "AsyncUser");

    let one = request
        .filtered_key_eq("name", "AsyncUser")
        .fetch_one_async()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(one.age, 50);

    assert_eq!(request.count_async().await, 1);

    let records = request.query_async(&["name"]).await.unwrap();
    assert_eq!(records.len(), 1);

    let distinct = request.query_set_async("name").await.unwrap();
    assert_eq!(distinct.len(), 1);
}

#[tokio::test]
async fn test_create_async_registers_instance() {
    let storage = in_memory_storage();
    let main = storage.main_context();

    let mut created: User = main.create_async().await.unwrap();
    created.name = "Created".into();
    created.age = 7;
    main.insert_async(&mut created).await.unwrap();
    main.save().unwrap();

    let fetched = storage
        .request::<User>()
        .filtered_key_eq("name", "Created")
        .fetch_one()
        .unwrap()
        .unwrap();
    assert_eq!(fetched.age, 7);
}
