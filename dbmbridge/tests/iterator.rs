use dbmbridge::*;

fn open_with(params: &str, records: &[(&str, &str)]) -> Dbm {
    let mut dbm = Dbm::new(&Context::default());
    let status = dbm.open("", true, &Params::parse(params)).unwrap();
    assert!(status.is_ok(), "open failed: {status}");
    dbm.set_multi(records, true).unwrap();
    dbm
}

fn ordered(records: &[(&str, &str)]) -> Dbm {
    open_with("dbm=BabyDBM", records)
}

fn key_of(iter: &mut DbmIterator) -> Option<String> {
    iter.get_key()
        .unwrap()
        .map(|key| String::from_utf8(key).unwrap())
}

// ----------------------------------------------------------------------------
// Forward traversal

#[test]
fn test_first_then_next_visits_every_record() {
    let dbm = ordered(&[("b", "2"), ("a", "1"), ("c", "3")]);
    let mut iter = dbm.make_iterator().unwrap();
    assert!(iter.first().unwrap().is_ok());

    let mut seen = Vec::new();
    for _ in 0..3 {
        let record = iter.get().unwrap();
        assert!(record.is_ok());
        seen.push(record.value.unwrap());
        assert!(iter.next().unwrap().is_ok());
    }
    assert_eq!(
        seen,
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ]
    );
    assert_eq!(iter.get().unwrap().status.code(), StatusCode::NotFoundError);
    assert_eq!(iter.next().unwrap().code(), StatusCode::NotFoundError);
}

#[test]
fn test_unordered_store_visits_every_key_once() {
    let dbm = open_with("", &[("x", "1"), ("y", "2"), ("z", "3")]);
    let mut iter = dbm.make_iterator().unwrap();
    iter.first().unwrap();
    let mut keys = Vec::new();
    loop {
        let record = iter.step().unwrap();
        let Some((key, _)) = record.value else {
            assert_eq!(record.status.code(), StatusCode::NotFoundError);
            break;
        };
        keys.push(key);
    }
    keys.sort();
    assert_eq!(keys, vec![b"x".to_vec(), b"y".to_vec(), b"z".to_vec()]);
}

#[test]
fn test_step_skips_a_record_removed_behind_the_cursor() {
    let dbm = ordered(&[("a", "1"), ("b", "2"), ("c", "3")]);
    let mut iter = dbm.make_iterator().unwrap();
    iter.first().unwrap();

    let (key, _) = iter.step().unwrap().value.unwrap();
    assert_eq!(key, b"a");
    dbm.remove("b").unwrap();
    let (key, value) = iter.step().unwrap().value.unwrap();
    assert_eq!(key, b"c");
    assert_eq!(value, b"3");

    let end = iter.step().unwrap();
    assert_eq!(end.status.code(), StatusCode::NotFoundError);
    assert!(!end.status.message().is_empty());
    assert_eq!(iter.to_string(), "DbmIterator(exhausted)");
}

#[test]
fn test_first_on_empty_store() {
    let dbm = ordered(&[]);
    let mut iter = dbm.make_iterator().unwrap();
    assert!(iter.first().unwrap().is_ok());
    assert_eq!(iter.get().unwrap().status.code(), StatusCode::NotFoundError);
    assert_eq!(iter.to_string(), "DbmIterator(exhausted)");
}

#[test]
fn test_next_before_positioning() {
    let dbm = ordered(&[("a", "1")]);
    let mut iter = dbm.make_iterator().unwrap();
    assert_eq!(iter.next().unwrap().code(), StatusCode::NotFoundError);
    assert_eq!(iter.to_string(), "DbmIterator(unpositioned)");
}

// ----------------------------------------------------------------------------
// Jumps and backward traversal

#[test]
fn test_jumps_on_ordered_store() {
    let dbm = ordered(&[("a", "1"), ("c", "3"), ("e", "5")]);
    let mut iter = dbm.make_iterator().unwrap();

    iter.jump("b").unwrap();
    assert_eq!(key_of(&mut iter).as_deref(), Some("c"));

    iter.jump_lower("c", false).unwrap();
    assert_eq!(key_of(&mut iter).as_deref(), Some("a"));
    iter.jump_lower("c", true).unwrap();
    assert_eq!(key_of(&mut iter).as_deref(), Some("c"));

    iter.jump_upper("c", false).unwrap();
    assert_eq!(key_of(&mut iter).as_deref(), Some("e"));
    iter.jump_upper("c", true).unwrap();
    assert_eq!(key_of(&mut iter).as_deref(), Some("c"));

    iter.last().unwrap();
    assert_eq!(key_of(&mut iter).as_deref(), Some("e"));
    assert!(iter.previous().unwrap().is_ok());
    assert_eq!(key_of(&mut iter).as_deref(), Some("c"));
}

#[test]
fn test_backward_moves_need_ordered_store() {
    let dbm = open_with("", &[("a", "1")]);
    let mut iter = dbm.make_iterator().unwrap();
    iter.first().unwrap();
    assert_eq!(iter.last().unwrap().code(), StatusCode::NotImplementedError);
    assert_eq!(iter.previous().unwrap().code(), StatusCode::NotImplementedError);
    assert_eq!(
        iter.jump_lower("a", true).unwrap().code(),
        StatusCode::NotImplementedError
    );
    assert_eq!(
        iter.jump_upper("a", true).unwrap().code(),
        StatusCode::NotImplementedError
    );

    assert!(iter.jump("a").unwrap().is_ok());
    assert_eq!(iter.jump("missing").unwrap().code(), StatusCode::NotFoundError);
}

// ----------------------------------------------------------------------------
// Updates through the cursor

#[test]
fn test_set_and_remove_at_cursor() {
    let dbm = ordered(&[("a", "1"), ("b", "2"), ("c", "3")]);
    let mut iter = dbm.make_iterator().unwrap();
    iter.first().unwrap();

    assert!(iter.set("one").unwrap().is_ok());
    assert_eq!(dbm.get("a").unwrap().value, Some(b"one".to_vec()));

    assert!(iter.remove().unwrap().is_ok());
    assert!(!dbm.contains("a").unwrap());
    assert_eq!(key_of(&mut iter).as_deref(), Some("b"));
    assert_eq!(iter.get_value().unwrap(), Some(b"2".to_vec()));
}

#[test]
fn test_cursor_moves_past_vanished_record() {
    let dbm = ordered(&[("a", "1"), ("b", "2"), ("c", "3")]);
    let mut iter = dbm.make_iterator().unwrap();
    iter.jump("b").unwrap();
    dbm.remove("b").unwrap();

    assert_eq!(key_of(&mut iter).as_deref(), Some("c"));
    assert_eq!(iter.set("x").unwrap().code(), StatusCode::Success);
    dbm.remove("c").unwrap();
    assert_eq!(iter.set("y").unwrap().code(), StatusCode::NotFoundError);
}

#[test]
fn test_pop_first_through_cursor() {
    let dbm = ordered(&[("b", "2"), ("a", "1")]);
    let mut iter = dbm.make_iterator().unwrap();
    let popped = iter.pop_first().unwrap();
    assert_eq!(popped.value, Some((b"a".to_vec(), b"1".to_vec())));
    assert_eq!(dbm.count().unwrap(), 1);
}

// ----------------------------------------------------------------------------
// Lifecycle

#[test]
fn test_iterator_outliving_store_close() {
    let mut dbm = ordered(&[("a", "1")]);
    let mut iter = dbm.make_iterator().unwrap();
    iter.first().unwrap();
    dbm.close().unwrap();

    assert!(matches!(iter.first(), Err(Error::NotOpened(HandleKind::Store))));
    assert!(matches!(iter.get(), Err(Error::NotOpened(_))));
    assert!(iter.destruct().is_ok());
}

#[test]
fn test_destruct_twice() {
    let dbm = ordered(&[("a", "1")]);
    let mut iter = dbm.make_iterator().unwrap();
    iter.destruct().unwrap();
    assert!(matches!(
        iter.destruct(),
        Err(Error::AlreadyReleased(HandleKind::Iterator))
    ));
    assert!(matches!(
        iter.first(),
        Err(Error::NotOpened(HandleKind::Iterator))
    ));
}

#[test]
fn test_iterator_needs_open_store() {
    let dbm = Dbm::new(&Context::default());
    assert!(matches!(
        dbm.make_iterator(),
        Err(Error::NotOpened(HandleKind::Store))
    ));
}
