use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::test::fixtures::*;
use crate::*;

fn last_name_slice(db: &Arc<MemoryDatabase<User>>, last_name: &str) -> Result<Slice<User>> {
    Slice::new(
        db.clone(),
        ViewOptions::new(USERS)
            .index(sindex!("lastName", last_name))
            .compare(by_path("firstName")),
    )
}

#[tokio::test]
async fn test_full_scan_sorted_by_comparer() -> Result<()> {
    let db = users_db()?;
    let slice = Slice::new(db.clone(), ViewOptions::new(USERS).compare(by_path("age")))?;
    assert!(slice.get_snapshot().is_empty());

    slice.setup().await?;

    assert_eq!(ids(&slice.get_snapshot()), vec![6, 2, 9, 4, 7, 1, 5, 3, 8]);
    Ok(())
}

#[tokio::test]
async fn test_default_order_is_key_order() -> Result<()> {
    let db = users_db()?;
    let slice = Slice::new(db.clone(), ViewOptions::new(USERS))?;
    slice.setup().await?;

    db.put(USERS, user(0, "Zed", "Z", 50))?;
    assert_eq!(ids(&slice.get_snapshot()), vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    Ok(())
}

#[tokio::test]
async fn test_index_filter_tracks_puts() -> Result<()> {
    let db = users_db()?;
    let slice = last_name_slice(&db, "A")?;
    slice.setup().await?;
    assert_eq!(ids(&slice.get_snapshot()), vec![2, 1]);

    // Moving a tracked record out of the index removes it.
    db.put(USERS, user(1, "Ann", "Q", 31))?;
    assert_eq!(ids(&slice.get_snapshot()), vec![2]);

    // A new record inside the index is added in order.
    db.put(USERS, user(10, "Aly", "A", 40))?;
    assert_eq!(ids(&slice.get_snapshot()), vec![2, 10]);

    // Moving a record into the index adds it.
    db.put(USERS, user(9, "Eve", "A", 19))?;
    assert_eq!(ids(&slice.get_snapshot()), vec![2, 10, 9]);

    // Updates that change the sort field reposition the record.
    db.put(USERS, user(2, "Zoe", "A", 17))?;
    assert_eq!(ids(&slice.get_snapshot()), vec![10, 9, 2]);
    assert_eq!(slice.get_snapshot().get(&skey!(2)).map(|u| u.first_name.as_str()), Some("Zoe"));
    Ok(())
}

#[tokio::test]
async fn test_index_and_predicate_must_both_hold() -> Result<()> {
    let db = users_db()?;
    db.put(USERS, user(11, "Amy", "A", 52))?;

    let slice = Slice::new(
        db.clone(),
        ViewOptions::new(USERS)
            .index(sindex!("lastName", "A"))
            .filter(|u: &User| u.age >= 18),
    )?;
    slice.setup().await?;
    assert_eq!(ids(&slice.get_snapshot()), vec![1, 11]);

    // Failing the predicate removes the record.
    db.put(USERS, user(1, "Ann", "A", 12))?;
    assert_eq!(ids(&slice.get_snapshot()), vec![11]);

    // Leaving the index removes the record.
    db.put(USERS, user(11, "Amy", "B", 52))?;
    assert!(slice.get_snapshot().is_empty());

    // Satisfying both adds it back.
    db.put(USERS, user(2, "Abe", "A", 18))?;
    assert_eq!(ids(&slice.get_snapshot()), vec![2]);
    Ok(())
}

#[tokio::test]
async fn test_predicate_without_index() -> Result<()> {
    let db = users_db()?;
    let slice = Slice::new(db.clone(), ViewOptions::new(USERS).filter(|u: &User| u.age > 40))?;
    slice.setup().await?;
    assert_eq!(ids(&slice.get_snapshot()), vec![3, 8]);

    db.put(USERS, user(4, "Bob", "B", 41))?;
    assert_eq!(ids(&slice.get_snapshot()), vec![3, 4, 8]);
    Ok(())
}

#[tokio::test]
async fn test_batch_notifies_once() -> Result<()> {
    let db = users_db()?;
    let slice = last_name_slice(&db, "A")?;
    slice.setup().await?;

    let calls = CallCounter::default();
    slice.subscribe(calls.callback());

    db.transaction()
        .put(USERS, user(20, "Ada", "A", 20))
        .put(USERS, user(21, "Art", "A", 21))
        .delete(USERS, 1)
        .commit()?;

    assert_eq!(calls.count(), 1);
    assert_eq!(ids(&slice.get_snapshot()), vec![2, 20, 21]);
    Ok(())
}

#[tokio::test]
async fn test_irrelevant_changes_keep_snapshot() -> Result<()> {
    let db = users_db()?;
    let slice = last_name_slice(&db, "A")?;
    slice.setup().await?;

    let calls = CallCounter::default();
    slice.subscribe(calls.callback());
    let before = slice.get_snapshot();

    db.put(TEAMS, user(1, "Team", "A", 0))?;
    db.put(USERS, user(5, "Cal", "C", 39))?;
    db.delete(USERS, 404)?;

    assert_eq!(calls.count(), 0);
    assert!(Arc::ptr_eq(&before, &slice.get_snapshot()));
    Ok(())
}

#[tokio::test]
async fn test_clear_empties_slice() -> Result<()> {
    let db = users_db()?;
    let slice = last_name_slice(&db, "A")?;
    slice.setup().await?;

    let calls = CallCounter::default();
    slice.subscribe(calls.callback());

    db.clear(USERS)?;
    assert!(slice.get_snapshot().is_empty());
    assert_eq!(calls.count(), 1);

    db.clear(USERS)?;
    assert_eq!(calls.count(), 1);

    db.put(USERS, user(1, "Ann", "A", 31))?;
    assert_eq!(ids(&slice.get_snapshot()), vec![1]);
    Ok(())
}

#[tokio::test]
async fn test_teardown_stops_tracking_and_setup_reloads() -> Result<()> {
    let db = users_db()?;
    let slice = last_name_slice(&db, "A")?;
    slice.setup().await?;
    slice.setup().await?;
    assert_eq!(db.hub().listener_count(), 1);

    slice.teardown();
    assert_eq!(db.hub().listener_count(), 0);
    db.put(USERS, user(30, "Ava", "A", 30))?;
    assert_eq!(ids(&slice.get_snapshot()), vec![2, 1]);

    slice.setup().await?;
    assert_eq!(ids(&slice.get_snapshot()), vec![2, 1, 30]);
    Ok(())
}

#[tokio::test]
async fn test_unsubscribe_stops_callbacks() -> Result<()> {
    let db = users_db()?;
    let slice = last_name_slice(&db, "A")?;
    slice.setup().await?;

    let calls = CallCounter::default();
    let token = slice.subscribe(calls.callback());
    db.put(USERS, user(40, "Ari", "A", 40))?;
    assert!(slice.unsubscribe(&token));
    db.put(USERS, user(41, "Axl", "A", 41))?;

    assert_eq!(calls.count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_storage_failure_surfaces_from_setup() -> Result<()> {
    let engine = TestEngine::new(users_db()?);
    engine.set_failing(true);
    let slice = Slice::new(engine.clone(), ViewOptions::new(USERS))?;

    let expected = Err(Error::Storage("read rejected".to_string()));
    assert_eq!(slice.setup().await, expected);
    assert_eq!(slice.setup().await, expected);
    assert!(slice.get_snapshot().is_empty());

    slice.teardown();
    engine.set_failing(false);
    slice.setup().await?;
    assert_eq!(slice.get_snapshot().len(), 9);
    Ok(())
}

#[tokio::test]
async fn test_stale_population_is_discarded() -> Result<()> {
    let engine = TestEngine::gated(users_db()?);
    let slice = Slice::new(engine.clone(), ViewOptions::new(USERS))?;

    let pending = {
        let slice = slice.clone();
        tokio::spawn(async move { slice.setup().await })
    };
    while !slice.is_connected() {
        tokio::task::yield_now().await;
    }

    slice.teardown();
    engine.release(1);
    pending.await.map_err(|e| Error::Runtime(e.to_string()))??;
    assert!(slice.get_snapshot().is_empty());

    engine.release(1);
    slice.setup().await?;
    assert_eq!(slice.get_snapshot().len(), 9);
    Ok(())
}

#[tokio::test]
async fn test_unknown_store_is_rejected() {
    let db = Arc::new(MemoryDatabase::<User>::open(schema()));
    let result = Slice::new(db, ViewOptions::new("projects"));
    assert!(matches!(result, Err(Error::UnknownStore(store)) if store == "projects"));
}

#[tokio::test]
async fn test_unknown_index_fails_setup() {
    let db = Arc::new(MemoryDatabase::<User>::open(schema()));
    let slice = Slice::new(db, ViewOptions::new(USERS).index(sindex!("firstName", "Ann")))
        .expect("users store exists");

    assert_eq!(
        slice.setup().await,
        Err(Error::UnknownIndex {
            store: USERS.to_string(),
            path: "firstName".to_string(),
        })
    );
}

/// Age order that can be reversed after the slice has been populated.
fn flippable_age_slice(db: &Arc<MemoryDatabase<User>>, flipped: Arc<AtomicBool>) -> Result<Slice<User>> {
    Slice::new(
        db.clone(),
        ViewOptions::new(USERS).compare(Arc::new(move |a: &User, b: &User| {
            let order = a.age.cmp(&b.age);
            if flipped.load(Ordering::SeqCst) {
                order.reverse()
            } else {
                order
            }
        })),
    )
}

#[tokio::test]
async fn test_lost_position_fails_the_commit() -> Result<()> {
    let db = users_db()?;
    let flipped = Arc::new(AtomicBool::new(false));
    let slice = flippable_age_slice(&db, flipped.clone())?;
    slice.setup().await?;

    let calls = CallCounter::default();
    slice.subscribe(calls.callback());
    flipped.store(true, Ordering::SeqCst);

    assert_eq!(db.delete(USERS, 6), Err(Error::PositionNotFound(skey!(6))));
    assert_eq!(db.get(USERS, &skey!(6)).await?, None);
    assert!(slice.get_snapshot().get(&skey!(6)).is_some());
    assert_eq!(calls.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_changes_before_a_failure_are_announced() -> Result<()> {
    let db = users_db()?;
    let flipped = Arc::new(AtomicBool::new(false));
    let slice = flippable_age_slice(&db, flipped.clone())?;
    slice.setup().await?;

    let calls = CallCounter::default();
    slice.subscribe(calls.callback());
    flipped.store(true, Ordering::SeqCst);

    let result = db
        .transaction()
        .put(USERS, user(20, "Nia", "N", 50))
        .delete(USERS, 6)
        .commit();

    assert_eq!(result, Err(Error::PositionNotFound(skey!(6))));
    assert!(slice.get_snapshot().get(&skey!(20)).is_some());
    assert_eq!(calls.count(), 1);
    Ok(())
}
