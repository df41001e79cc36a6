use dbmbridge::*;

fn open(path: &str, params: &Params) -> Dbm {
    let mut dbm = Dbm::new(&Context::default());
    let status = dbm.open(path, true, params).unwrap();
    assert!(status.is_ok(), "open failed: {status}");
    dbm
}

fn memory() -> Dbm {
    open("", &Params::new())
}

// ----------------------------------------------------------------------------
// Lifecycle

#[test]
fn test_second_close_is_state_error() {
    let mut dbm = memory();
    assert!(dbm.is_open());
    assert!(dbm.close().unwrap().is_ok());
    assert!(!dbm.is_open());

    let err = dbm.close().unwrap_err();
    assert!(matches!(err, Error::AlreadyReleased(HandleKind::Store)));
    assert!(matches!(dbm.get("a"), Err(Error::NotOpened(_))));
}

#[test]
fn test_close_of_never_opened_store() {
    let mut dbm = Dbm::new(&Context::default());
    assert!(matches!(dbm.close(), Err(Error::NeverBound(_))));
    dbm.destruct();
    dbm.destruct();
}

#[test]
fn test_failed_open_leaves_store_closed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.tkh");
    let mut dbm = Dbm::new(&Context::default());
    let status = dbm.open(path.to_str().unwrap(), false, &Params::new()).unwrap();
    assert_eq!(status.code(), StatusCode::NotFoundError);
    assert!(!dbm.is_open());
}

#[test]
fn test_bad_open_flag_is_argument_error() {
    let mut dbm = Dbm::new(&Context::default());
    let err = dbm
        .open("", true, &Params::parse("truncate=sometimes"))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_read_only_store_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("casket.tkh");
    let path = path.to_str().unwrap();
    {
        let dbm = open(path, &Params::new());
        assert!(dbm.set("k", "v", true).unwrap().is_ok());
    }

    let mut dbm = Dbm::new(&Context::default());
    assert!(dbm.open(path, false, &Params::new()).unwrap().is_ok());
    assert!(!dbm.is_writable().unwrap());
    assert_eq!(dbm.get("k").unwrap().value.as_deref(), Some(&b"v"[..]));
    let status = dbm.set("k", "w", true).unwrap();
    assert_eq!(status.code(), StatusCode::PreconditionError);
    assert_eq!(status.message(), "not writable database");
}

// ----------------------------------------------------------------------------
// Record operations

#[test]
fn test_set_overwrite_scenario() {
    let dbm = memory();
    assert!(dbm.set("a", "1", true).unwrap().is_ok());
    assert!(dbm.set("a", "2", true).unwrap().is_ok());
    assert_eq!(dbm.get("a").unwrap().value.as_deref(), Some(&b"2"[..]));

    let status = dbm.set("a", "3", false).unwrap();
    assert_eq!(status.code(), StatusCode::DuplicationError);
    assert_eq!(dbm.get("a").unwrap().value.as_deref(), Some(&b"2"[..]));
}

#[test]
fn test_set_and_get_without_overwrite() {
    let dbm = memory();
    dbm.set("k", "old", true).unwrap();
    let result = dbm.set_and_get("k", "new", false).unwrap();
    assert_eq!(result.status.code(), StatusCode::DuplicationError);
    assert_eq!(result.value.as_deref(), Some(&b"old"[..]));
    assert_eq!(dbm.get("k").unwrap().value.as_deref(), Some(&b"old"[..]));

    let result = dbm.set_and_get("k", "new", true).unwrap();
    assert!(result.is_ok());
    assert_eq!(result.value.as_deref(), Some(&b"old"[..]));
    assert_eq!(dbm.get("k").unwrap().value.as_deref(), Some(&b"new"[..]));
}

#[test]
fn test_remove_and_get() {
    let dbm = memory();
    let result = dbm.remove_and_get("missing").unwrap();
    assert_eq!(result.status.code(), StatusCode::NotFoundError);
    assert!(result.value.is_none());

    dbm.set("k", "v", true).unwrap();
    let result = dbm.remove_and_get("k").unwrap();
    assert!(result.is_ok());
    assert_eq!(result.value.as_deref(), Some(&b"v"[..]));
    assert_eq!(dbm.get("k").unwrap().status.code(), StatusCode::NotFoundError);
}

#[test]
fn test_out_status_is_overwritten() {
    let dbm = memory();
    let mut status = Status::new(StatusCode::SystemError, "stale");
    let value = dbm.get("missing").unwrap().assign_to(&mut status);
    assert!(value.is_none());
    assert_eq!(status.code(), StatusCode::NotFoundError);

    dbm.set("k", "v", true).unwrap();
    let value = dbm.get("k").unwrap().assign_to(&mut status);
    assert_eq!(value.as_deref(), Some(&b"v"[..]));
    assert!(status.is_ok());
}

#[test]
fn test_failures_carry_a_diagnostic() {
    let dbm = memory();
    dbm.set("k", "v", true).unwrap();

    let mut failures = vec![
        dbm.set("k", "w", false).unwrap(),
        dbm.set_and_get("k", "w", false).unwrap().status,
        dbm.get("missing").unwrap().status,
        dbm.remove("missing").unwrap(),
        dbm.rekey("missing", "x", true, false).unwrap(),
        dbm.rekey("k", "k", false, false).unwrap(),
        dbm.compare_exchange("k", Expected::Absent, Desired::Remove).unwrap(),
        dbm.remove_multi(&["missing"]).unwrap(),
    ];
    let mut iter = dbm.make_iterator().unwrap();
    failures.push(iter.next().unwrap());
    failures.push(iter.get().unwrap().status);
    failures.push(iter.set("x").unwrap());
    dbm.clear().unwrap();
    failures.push(dbm.pop_first().unwrap().status);

    for status in failures {
        assert!(!status.is_ok());
        assert!(!status.message().is_empty(), "no message on {status}");
    }
}

#[test]
fn test_multi_operations() {
    let dbm = memory();
    let status = dbm
        .set_multi(&[("a", "1"), ("b", "2"), ("c", "3")], true)
        .unwrap();
    assert!(status.is_ok());

    let found = dbm.get_multi(&["a", "c", "zzz"]).unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found.get(&b"c"[..]).map(Vec::as_slice), Some(&b"3"[..]));

    let status = dbm.set_multi(&[("a", "9"), ("d", "4")], false).unwrap();
    assert_eq!(status.code(), StatusCode::DuplicationError);
    assert_eq!(dbm.count().unwrap(), 4);

    let status = dbm.remove_multi(&["a", "nope", "b"]).unwrap();
    assert_eq!(status.code(), StatusCode::NotFoundError);
    assert_eq!(dbm.count().unwrap(), 2);
}

#[test]
fn test_append() {
    let dbm = memory();
    dbm.append("k", "a", ",").unwrap();
    dbm.append("k", "b", ",").unwrap();
    assert_eq!(dbm.get("k").unwrap().value.as_deref(), Some(&b"a,b"[..]));

    dbm.append_multi(&[("k", "c"), ("j", "x")], "").unwrap();
    assert_eq!(dbm.get("k").unwrap().value.as_deref(), Some(&b"a,bc"[..]));
    assert_eq!(dbm.get("j").unwrap().value.as_deref(), Some(&b"x"[..]));
}

#[test]
fn test_rekey() {
    let dbm = memory();
    dbm.set("old", "v", true).unwrap();
    dbm.set("taken", "w", true).unwrap();

    let status = dbm.rekey("old", "taken", false, false).unwrap();
    assert_eq!(status.code(), StatusCode::DuplicationError);

    assert!(dbm.rekey("old", "copy", false, true).unwrap().is_ok());
    assert!(dbm.contains("old").unwrap());
    assert!(dbm.rekey("old", "new", false, false).unwrap().is_ok());
    assert!(!dbm.contains("old").unwrap());
    assert_eq!(dbm.get("new").unwrap().value.as_deref(), Some(&b"v"[..]));

    let status = dbm.rekey("ghost", "x", true, false).unwrap();
    assert_eq!(status.code(), StatusCode::NotFoundError);
}

#[test]
fn test_queue_with_push_last_and_pop_first() {
    let dbm = open("", &Params::parse("dbm=BabyDBM"));
    dbm.push_last("first", 100.0).unwrap();
    dbm.push_last("second", 100.0).unwrap();
    dbm.push_last("third", 50.0).unwrap();

    let (_, value) = dbm.pop_first().unwrap().value.unwrap();
    assert_eq!(value, b"third");
    let (_, value) = dbm.pop_first().unwrap().value.unwrap();
    assert_eq!(value, b"first");
    let (_, value) = dbm.pop_first().unwrap().value.unwrap();
    assert_eq!(value, b"second");
    let empty = dbm.pop_first().unwrap();
    assert_eq!(empty.status.code(), StatusCode::NotFoundError);
}

#[test]
fn test_clear_and_inspect() {
    let dbm = memory();
    dbm.set("a", "1", true).unwrap();
    let info = dbm.inspect().unwrap();
    assert_eq!(info.get("class").map(String::as_str), Some("TinyDBM"));
    assert_eq!(info.get("num_records").map(String::as_str), Some("1"));

    assert!(dbm.clear().unwrap().is_ok());
    assert_eq!(dbm.count().unwrap(), 0);
    assert!(dbm.is_healthy().unwrap());
    assert!(!dbm.should_be_rebuilt().unwrap());
    assert!(dbm.rebuild(&Params::new()).unwrap().is_ok());
}

#[test]
fn test_timestamp_follows_updates() {
    let mut dbm = memory();
    let opened = dbm.timestamp().unwrap().unwrap();
    assert!(opened > 0.0);

    std::thread::sleep(std::time::Duration::from_millis(20));
    dbm.set("k", "v", true).unwrap();
    let updated = dbm.timestamp().unwrap().unwrap();
    assert!(updated > opened);

    dbm.get("k").unwrap();
    dbm.remove("missing").unwrap();
    assert_eq!(dbm.timestamp().unwrap(), Some(updated));

    dbm.close().unwrap();
    assert!(matches!(dbm.timestamp(), Err(Error::NotOpened(_))));
}

// ----------------------------------------------------------------------------
// Persistence

#[test]
fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("casket.tkt");
    let path = path.to_str().unwrap();

    let mut dbm = open(path, &Params::new());
    assert!(dbm.is_ordered().unwrap());
    dbm.set("x", "1", true).unwrap();
    dbm.set("y", "2", true).unwrap();
    assert!(dbm.synchronize(true, &Params::new()).unwrap().is_ok());
    assert!(dbm.file_size().unwrap() > 0);
    assert_eq!(dbm.file_path().unwrap(), path);
    assert!(dbm.close().unwrap().is_ok());

    assert!(dbm.open(path, true, &Params::new()).unwrap().is_ok());
    assert_eq!(dbm.count().unwrap(), 2);
    dbm.close().unwrap();

    assert!(dbm.open(path, true, &Params::parse("truncate=true")).unwrap().is_ok());
    assert_eq!(dbm.count().unwrap(), 0);
}

#[cfg(unix)]
#[test]
fn test_second_writer_is_locked_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("casket.tkt");
    let path = path.to_str().unwrap();

    let mut first = open(path, &Params::new());
    first.set("a", "1", true).unwrap();

    let mut second = Dbm::new(&Context::default());
    let status = second.open(path, true, &Params::parse("no_wait=true")).unwrap();
    assert_eq!(status.code(), StatusCode::InfeasibleError);
    assert!(!second.is_open());

    assert!(first.close().unwrap().is_ok());
    assert!(second.open(path, true, &Params::parse("no_wait=true")).unwrap().is_ok());
    second.set("b", "2", true).unwrap();
    assert!(second.close().unwrap().is_ok());

    let reader = {
        let mut dbm = Dbm::new(&Context::default());
        assert!(dbm.open(path, false, &Params::new()).unwrap().is_ok());
        dbm
    };
    assert_eq!(reader.count().unwrap(), 2);
}

#[test]
fn test_absurd_shard_count_is_refused() {
    let mut dbm = Dbm::new(&Context::default());
    let err = dbm
        .open("", true, &Params::parse("num_shards=4000000000"))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(!dbm.is_open());
}

#[test]
fn test_sharded_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("casket.tkh");
    let path = path.to_str().unwrap();

    let mut dbm = open(path, &Params::parse("num_shards=4"));
    for index in 0..20 {
        dbm.set(format!("key{index}"), format!("{index}"), true).unwrap();
    }
    let info = dbm.inspect().unwrap();
    assert_eq!(info.get("class").map(String::as_str), Some("ShardDBM"));
    assert_eq!(info.get("num_shards").map(String::as_str), Some("4"));
    dbm.close().unwrap();

    assert!(dbm.open(path, false, &Params::parse("num_shards=0")).unwrap().is_ok());
    assert_eq!(dbm.count().unwrap(), 20);
    assert_eq!(dbm.get("key7").unwrap().value.as_deref(), Some(&b"7"[..]));
}

#[test]
fn test_copy_file_data_and_export() {
    let dir = tempfile::tempdir().unwrap();
    let copy = dir.path().join("copy.tkh");
    let copy = copy.to_str().unwrap();

    let dbm = memory();
    dbm.set_multi(&[("a", "1"), ("b", "2")], true).unwrap();
    assert!(dbm.copy_file_data(copy, false).unwrap().is_ok());

    let mut restored = Dbm::new(&Context::default());
    assert!(restored.open(copy, false, &Params::new()).unwrap().is_ok());
    assert_eq!(restored.count().unwrap(), 2);

    let other = memory();
    assert!(dbm.export(&other).unwrap().is_ok());
    assert_eq!(other.get_multi(&["a", "b"]).unwrap().len(), 2);
}

#[test]
fn test_flat_record_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.flat");
    let path = path.to_str().unwrap();
    let ctx = Context::default();

    let dbm = memory();
    dbm.set_multi(&[("k1", "v1"), ("k2", "v2"), ("k3", "")], true)
        .unwrap();

    let mut file = File::new(&ctx);
    assert!(file.open(path, true, &Params::parse("truncate=true")).unwrap().is_ok());
    assert!(dbm.export_to_flat_records(&file).unwrap().is_ok());
    file.close().unwrap();

    let mut file = File::new(&ctx);
    assert!(file.open(path, false, &Params::new()).unwrap().is_ok());
    let target = memory();
    assert!(target.import_from_flat_records(&file).unwrap().is_ok());
    assert_eq!(target.count().unwrap(), 3);
    assert_eq!(target.get("k3").unwrap().value.as_deref(), Some(&b""[..]));
}

#[test]
fn test_export_keys_as_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.txt");
    let ctx = Context::default();

    let dbm = open("", &Params::parse("dbm=StdTreeDBM"));
    dbm.set_multi(&[("b", "2"), ("a", "1")], true).unwrap();

    let mut file = File::new(&ctx);
    file.open(path.to_str().unwrap(), true, &Params::new()).unwrap();
    assert!(dbm.export_keys_as_lines(&file).unwrap().is_ok());
    file.close().unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");
}

#[test]
fn test_import_of_garbage_is_broken_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.flat");
    std::fs::write(&path, b"not flat records").unwrap();

    let mut file = File::new(&Context::default());
    file.open(path.to_str().unwrap(), false, &Params::new()).unwrap();
    let dbm = memory();
    let status = dbm.import_from_flat_records(&file).unwrap();
    assert_eq!(status.code(), StatusCode::BrokenDataError);
    assert_eq!(dbm.count().unwrap(), 0);
}
