mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use common::{path, Fixture};
use indexdb::{
    index_db::{Location, StoreKind},
    jobs::{JobStatus, QueryFlags, QueryKind, QueryMessage},
};

/// `foo` at L1 (definition), L2, L3; `foobar` at L4 (definition).
fn populated() -> (Fixture, [Location; 4]) {
    let fixture = Fixture::new();
    let a = fixture.file("a.cpp");
    let b = fixture.file("b.cpp");
    let l1 = Location::new(a, 10);
    let l2 = Location::new(a, 50);
    let l3 = Location::new(b, 5);
    let l4 = Location::new(a, 30);
    fixture.add_symbol("foo", &[(l1, true), (l2, false), (l3, false)]);
    fixture.add_symbol("foobar", &[(l4, true)]);
    (fixture, [l1, l2, l3, l4])
}

fn find(name: &str) -> QueryMessage {
    QueryMessage::new(QueryKind::FindSymbols, name)
}

fn key(file: &str, offset: u32) -> String {
    format!("{},{}", path(file), offset)
}

#[test]
fn exact_name_only() {
    let (fixture, _) = populated();
    let (status, lines) = fixture.run(find("foo"));
    assert_eq!(status, JobStatus::Completed);
    assert_eq!(lines, vec![key("a.cpp", 10), key("a.cpp", 50), key("b.cpp", 5)]);
}

#[test]
fn prefixes_and_unknown_names_find_nothing() {
    let (fixture, _) = populated();
    for name in ["fo", "foob", "zzz", "aaa"] {
        let (status, lines) = fixture.run(find(name));
        assert_eq!(status, JobStatus::Completed);
        assert!(lines.is_empty(), "{} found {:?}", name, lines);
    }
}

#[test]
fn empty_query_finds_everything_definitions_first() {
    let (fixture, _) = populated();
    let (status, lines) = fixture.run(find(""));
    assert_eq!(status, JobStatus::Completed);
    assert_eq!(
        lines,
        vec![key("a.cpp", 10), key("a.cpp", 30), key("a.cpp", 50), key("b.cpp", 5)]
    );
}

#[test]
fn reverse_sort_inverts_everything() {
    let (fixture, _) = populated();
    let (_, lines) = fixture.run(find("foo").with_flags(QueryFlags::REVERSE_SORT));
    assert_eq!(lines, vec![key("b.cpp", 5), key("a.cpp", 50), key("a.cpp", 10)]);

    let (_, lines) = fixture.run(find("").with_flags(QueryFlags::REVERSE_SORT));
    assert_eq!(
        lines,
        vec![key("b.cpp", 5), key("a.cpp", 50), key("a.cpp", 30), key("a.cpp", 10)]
    );
}

#[test]
fn missing_cursor_info_is_not_a_definition() {
    let fixture = Fixture::new();
    let a = fixture.file("a.cpp");
    fixture.add_symbol("bar", &[(Location::new(a, 20), true)]);
    {
        // A name entry with no cursor behind it, and one with a broken cursor.
        let mut names = fixture.store(StoreKind::SymbolNames).acquire_write();
        let locations = [Location::new(a, 20), Location::new(a, 1), Location::new(a, 2)];
        names.put(b"bar", &locations).unwrap();
        let mut symbols = fixture.store(StoreKind::Symbols).acquire_write();
        symbols.put_raw(&Location::new(a, 2).to_key(), b"not json".to_vec());
    }
    let (status, lines) = fixture.run(find("bar"));
    assert_eq!(status, JobStatus::Completed);
    assert_eq!(lines, vec![key("a.cpp", 20), key("a.cpp", 1), key("a.cpp", 2)]);
}

#[test]
fn corrupt_name_records_are_skipped() {
    let (fixture, _) = populated();
    fixture
        .store(StoreKind::SymbolNames)
        .acquire_write()
        .put_raw(b"broken", b"{".to_vec());
    let (status, lines) = fixture.run(find(""));
    assert_eq!(status, JobStatus::Completed);
    assert_eq!(lines.len(), 4);
}

#[test]
fn unknown_files_render_with_an_empty_path() {
    let fixture = Fixture::new();
    fixture.add_symbol("ghost", &[(Location::new(77, 3), false)]);
    let (_, lines) = fixture.run(find("ghost"));
    assert_eq!(lines, vec![",3".to_string()]);
}

#[test]
fn elisp_output_is_quoted() {
    let (fixture, _) = populated();
    let mut job = fixture.job(find("foobar").with_flags(QueryFlags::ELISP_LIST));
    assert_eq!(job.execute(), JobStatus::Completed);
    let quoted = format!("\"{}\"", key("a.cpp", 30));
    assert_eq!(job.lines(), &[quoted.clone()]);
    assert_eq!(job.output_as_elisp_list(), format!("(list {})", quoted));
}

#[test]
fn path_filters_do_not_apply() {
    let (fixture, _) = populated();
    let query = find("foo").with_path_filters(vec![path("b.cpp")]);
    let (_, lines) = fixture.run(query);
    assert_eq!(lines.len(), 3);
}

#[test]
fn no_project_means_no_output() {
    let (fixture, _) = populated();
    let (status, lines) = fixture.run(find("foo").with_project_root("/elsewhere"));
    assert_eq!(status, JobStatus::Completed);
    assert!(lines.is_empty());
}

#[test]
fn abort_truncates_at_a_line_boundary() {
    let (fixture, _) = populated();
    for limit in 1..4 {
        let job = fixture.job(find(""));
        let handle = job.abort_handle();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let mut job = job.with_sink(Box::new(move |_: &str| {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == limit {
                handle.abort();
            }
        }));

        assert_eq!(job.execute(), JobStatus::Aborted);
        assert_eq!(job.lines().len(), limit);
        assert_eq!(seen.load(Ordering::SeqCst), limit);
    }
}

#[test]
fn lines_stream_to_the_sink_in_order() {
    let (fixture, _) = populated();
    let streamed = Arc::new(parking_lot::Mutex::new(vec![]));
    let sink = streamed.clone();
    let mut job = fixture
        .job(find("foo"))
        .with_sink(Box::new(move |line: &str| sink.lock().push(line.to_string())));
    job.execute();
    assert_eq!(*streamed.lock(), job.lines());
}

#[test]
fn list_symbols_scans_a_prefix() {
    let (fixture, _) = populated();
    fixture.add_symbol("fob", &[]);
    fixture.add_symbol("bar", &[]);
    let (status, lines) = fixture.run(QueryMessage::new(QueryKind::ListSymbols, "foo"));
    assert_eq!(status, JobStatus::Completed);
    assert_eq!(lines, vec!["foo", "foobar"]);

    let (_, lines) = fixture.run(
        QueryMessage::new(QueryKind::ListSymbols, "").with_flags(QueryFlags::REVERSE_SORT),
    );
    assert_eq!(lines, vec!["foobar", "foo", "fob", "bar"]);
}

#[test]
fn list_symbols_filters_by_location_paths() {
    let fixture = Fixture::new();
    let a = fixture.file("a.cpp");
    let b = fixture.file("b.cpp");
    fixture.add_symbol("foo", &[(Location::new(a, 1), true)]);
    fixture.add_symbol("fob", &[(Location::new(b, 1), true), (Location::new(b, 9), false)]);
    fixture.add_symbol("fog", &[]);
    let list = |filters: Vec<String>, flags: QueryFlags| {
        let query = QueryMessage::new(QueryKind::ListSymbols, "fo")
            .with_path_filters(filters)
            .with_flags(flags);
        fixture.run(query).1
    };

    assert_eq!(list(vec![format!("{}/", common::ROOT)], QueryFlags::empty()), vec!["fob", "foo"]);
    assert_eq!(list(vec![path("a")], QueryFlags::empty()), vec!["foo"]);
    assert_eq!(list(vec![r"b\.cpp$".to_string()], QueryFlags::MATCH_REGEX), vec!["fob"]);
    assert!(list(vec!["/elsewhere".to_string()], QueryFlags::empty()).is_empty());
    // Without filters even location-less names are listed.
    assert_eq!(list(vec![], QueryFlags::empty()), vec!["fob", "fog", "foo"]);
}

#[test]
fn line_numbers_and_context_come_from_the_source_file() {
    let dir = indexdb::utils::temp_dir::TempDir::new("indexdb-find-context-test");
    let source = dir.join("lib.cpp");
    std::fs::write(&source, "// lib\nint foo();\nint foo() { return 1; }\n").unwrap();
    let source = source.to_string_lossy().into_owned();

    let fixture = Fixture::new();
    let id = fixture.registry.register_file(&source).unwrap();
    fixture.add_symbol("foo", &[(Location::new(id, 11), false), (Location::new(id, 22), true)]);

    let (_, lines) = fixture.run(find("foo").with_flags(QueryFlags::SHOW_LINE_NUMBERS));
    assert_eq!(lines, vec![format!("{}:3:5:", source), format!("{}:2:5:", source)]);

    let flags = QueryFlags::SHOW_LINE_NUMBERS | QueryFlags::SHOW_CONTEXT;
    let (_, lines) = fixture.run(find("foo").with_flags(flags));
    assert_eq!(
        lines,
        vec![
            format!("{}:3:5:\tint foo() {{ return 1; }}", source),
            format!("{}:2:5:\tint foo();", source),
        ]
    );
}
