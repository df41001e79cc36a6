use dbmbridge::*;

fn memory() -> Dbm {
    let mut dbm = Dbm::new(&Context::default());
    assert!(dbm.open("", true, &Params::new()).unwrap().is_ok());
    dbm
}

fn value_of(dbm: &Dbm, key: &str) -> Option<Vec<u8>> {
    dbm.get(key).unwrap().value
}

// ----------------------------------------------------------------------------
// Caller-supplied processors

#[test]
fn test_closure_replaces_value() {
    let dbm = memory();
    dbm.set("n", "1", true).unwrap();
    let mut double = |_: &[u8], value: Option<&[u8]>| match value {
        Some(value) => Directive::Replace([value, value].concat()),
        None => Directive::Keep,
    };
    assert!(dbm.process("n", &mut double, true).unwrap().is_ok());
    assert!(dbm.process("absent", &mut double, true).unwrap().is_ok());
    assert_eq!(value_of(&dbm, "n"), Some(b"11".to_vec()));
    assert!(!dbm.contains("absent").unwrap());
}

#[test]
fn test_delete_directive_removes_record() {
    let dbm = memory();
    dbm.set("k", "v", true).unwrap();
    let mut delete = |_: &[u8], _: Option<&[u8]>| Directive::Delete;
    assert!(dbm.process("k", &mut delete, true).unwrap().is_ok());
    assert!(!dbm.contains("k").unwrap());
}

#[test]
fn test_panicking_processor_leaves_record_alone() {
    let dbm = memory();
    dbm.set("k", "v", true).unwrap();
    let mut faulty = |_: &[u8], _: Option<&[u8]>| -> Directive { panic!("callback exploded") };
    let status = dbm.process("k", &mut faulty, true).unwrap();
    assert_eq!(status.code(), StatusCode::ApplicationError);
    assert_eq!(value_of(&dbm, "k"), Some(b"v".to_vec()));

    // The store keeps working after a failed callback.
    assert!(dbm.set("k", "w", true).unwrap().is_ok());
}

#[test]
fn test_read_only_process_cannot_mutate() {
    let dbm = memory();
    dbm.set("k", "v", true).unwrap();
    let mut sneaky = |_: &[u8], _: Option<&[u8]>| Directive::Replace(b"x".to_vec());
    let status = dbm.process("k", &mut sneaky, false).unwrap();
    assert_eq!(status.code(), StatusCode::PreconditionError);
    assert_eq!(value_of(&dbm, "k"), Some(b"v".to_vec()));
}

struct Counter {
    full: usize,
    empty: usize,
}

impl RecordProcessor for Counter {
    fn process_full(&mut self, _key: &[u8], _value: &[u8]) -> Directive {
        self.full += 1;
        Directive::Keep
    }

    fn process_empty(&mut self, _key: &[u8]) -> Directive {
        self.empty += 1;
        Directive::Replace(b"seen".to_vec())
    }
}

#[test]
fn test_process_multi_calls_each_processor_once() {
    let dbm = memory();
    dbm.set("a", "1", true).unwrap();
    let mut first = Counter { full: 0, empty: 0 };
    let mut second = Counter { full: 0, empty: 0 };
    {
        let mut requests: Vec<(&[u8], &mut dyn RecordProcessor)> = Vec::new();
        requests.push((&b"a"[..], &mut first));
        requests.push((&b"b"[..], &mut second));
        assert!(dbm.process_multi(&mut requests, true).unwrap().is_ok());
    }
    assert_eq!((first.full, first.empty), (1, 0));
    assert_eq!((second.full, second.empty), (0, 1));
    assert_eq!(value_of(&dbm, "b"), Some(b"seen".to_vec()));
}

// ----------------------------------------------------------------------------
// Compare and exchange

#[test]
fn test_wildcard_expected_on_absent_key_sets() {
    let dbm = memory();
    let status = dbm
        .compare_exchange("k", Expected::Any, Desired::from(&b"v"[..]))
        .unwrap();
    assert!(status.is_ok());
    assert_eq!(value_of(&dbm, "k"), Some(b"v".to_vec()));
}

#[test]
fn test_wildcard_desired_deletes() {
    let dbm = memory();
    dbm.set("k", "v1", true).unwrap();
    let status = dbm
        .compare_exchange("k", Expected::from(&b"v1"[..]), Desired::Remove)
        .unwrap();
    assert!(status.is_ok());
    assert!(!dbm.contains("k").unwrap());
}

#[test]
fn test_compare_exchange_mismatch() {
    let dbm = memory();
    dbm.set("k", "actual", true).unwrap();
    let result = dbm
        .compare_exchange_and_get("k", Expected::from(&b"guess"[..]), Desired::from(&b"x"[..]))
        .unwrap();
    assert_eq!(result.status.code(), StatusCode::InfeasibleError);
    assert_eq!(result.value, Some(b"actual".to_vec()));
    assert_eq!(value_of(&dbm, "k"), Some(b"actual".to_vec()));

    let status = dbm
        .compare_exchange("k", Expected::Absent, Desired::from(&b"x"[..]))
        .unwrap();
    assert_eq!(status.code(), StatusCode::InfeasibleError);
}

#[test]
fn test_compare_exchange_existing_and_keep() {
    let dbm = memory();
    let status = dbm
        .compare_exchange("k", Expected::Existing, Desired::Keep)
        .unwrap();
    assert_eq!(status.code(), StatusCode::InfeasibleError);

    dbm.set("k", "v", true).unwrap();
    let result = dbm
        .compare_exchange_and_get("k", Expected::Existing, Desired::Keep)
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(result.value, Some(b"v".to_vec()));
}

#[test]
fn test_compare_exchange_multi_all_or_nothing() {
    let dbm = memory();
    dbm.set_multi(&[("a", "1"), ("b", "2")], true).unwrap();

    let status = dbm
        .compare_exchange_multi(
            &[("a", Expected::from(&b"1"[..])), ("b", Expected::from(&b"wrong"[..]))],
            &[("a", Desired::from(&b"10"[..])), ("b", Desired::Remove)],
        )
        .unwrap();
    assert_eq!(status.code(), StatusCode::InfeasibleError);
    assert_eq!(value_of(&dbm, "a"), Some(b"1".to_vec()));
    assert!(dbm.contains("b").unwrap());

    let status = dbm
        .compare_exchange_multi(
            &[("a", Expected::from(&b"1"[..])), ("c", Expected::Absent)],
            &[
                ("a", Desired::from(&b"10"[..])),
                ("b", Desired::Remove),
                ("c", Desired::from(&b"3"[..])),
            ],
        )
        .unwrap();
    assert!(status.is_ok());
    assert_eq!(value_of(&dbm, "a"), Some(b"10".to_vec()));
    assert!(!dbm.contains("b").unwrap());
    assert_eq!(value_of(&dbm, "c"), Some(b"3".to_vec()));
}

// ----------------------------------------------------------------------------
// Increment

#[test]
fn test_increment_fresh_key_stores_initial() {
    let dbm = memory();
    let result = dbm.increment("n", 5, 10).unwrap();
    assert!(result.is_ok());
    assert_eq!(result.value, Some(10));
    assert_eq!(value_of(&dbm, "n"), Some(10i64.to_be_bytes().to_vec()));
}

#[test]
fn test_increment_existing_value() {
    let dbm = memory();
    dbm.increment("n", 0, 32).unwrap();
    let result = dbm.increment("n", 5, 10).unwrap();
    assert_eq!(result.value, Some(37));
    assert_eq!(value_of(&dbm, "n"), Some(37i64.to_be_bytes().to_vec()));

    let read = dbm.increment("n", i64::MIN, 0).unwrap();
    assert_eq!(read.value, Some(37));
    assert_eq!(value_of(&dbm, "n"), Some(37i64.to_be_bytes().to_vec()));
}

#[test]
fn test_increment_non_integer_value() {
    let dbm = memory();
    dbm.set("n", "text", true).unwrap();
    let result = dbm.increment("n", 1, 0).unwrap();
    assert_eq!(result.status.code(), StatusCode::InfeasibleError);
    assert!(result.value.is_none());
    assert_eq!(value_of(&dbm, "n"), Some(b"text".to_vec()));
}
