//! Query surface scenarios: SQL shape, identity-mapped materialization,
//! projection, and store-level bulk delete.

use asupersync::Cx;
use asupersync::runtime::RuntimeBuilder;
use loam::prelude::*;

mod common;
use common::{RecordingConnection, catalog, fish_row, unwrap_outcome};

#[test]
fn filters_render_with_numbered_placeholders() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let conn = RecordingConnection::new();
    let session = Session::new(catalog(), conn.clone());

    let matches = rt.block_on(async {
        unwrap_outcome(
            session
                .query("fish")
                .unwrap()
                .filter(vec![Cond::ne("name", "fish")], Conjunctive::And)
                .unwrap()
                .all(&cx)
                .await,
        )
    });
    assert!(matches.is_empty());

    let recorded = conn.recorded();
    assert_eq!(
        recorded[0].0,
        "SELECT \"id\", \"name\", \"type_id\" FROM \"fish\" WHERE \"name\" != $1"
    );
    assert_eq!(recorded[0].1, vec![Value::from("fish")]);
}

#[test]
fn repeated_queries_return_the_same_instance() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let conn = RecordingConnection::new();
    let session = Session::new(catalog(), conn.clone());

    let (first, second) = rt.block_on(async {
        conn.push_reply(vec![fish_row(common::FISH_ID, "trout", None)]);
        let a = unwrap_outcome(session.query("fish").unwrap().all(&cx).await);
        conn.push_reply(vec![fish_row(common::FISH_ID, "trout", None)]);
        let b = unwrap_outcome(session.query("fish").unwrap().all(&cx).await);
        (a[0].clone(), b[0].clone())
    });
    assert!(first.ptr_eq(&second));
    assert_eq!(session.debug_state().identity_mapped, 1);
}

#[test]
fn refresh_keeps_local_changes() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let conn = RecordingConnection::new();
    let session = Session::new(catalog(), conn.clone());

    let trout = rt.block_on(async {
        conn.push_reply(vec![fish_row(common::FISH_ID, "trout", None)]);
        let mut all = unwrap_outcome(session.query("fish").unwrap().all(&cx).await);
        all.remove(0)
    });
    trout.set("name", Value::from("steelhead")).unwrap();

    rt.block_on(async {
        conn.push_reply(vec![fish_row(common::FISH_ID, "trout", None)]);
        unwrap_outcome(session.query("fish").unwrap().all(&cx).await);
    });
    // The store's stale value does not clobber the pending change.
    assert_eq!(trout.get("name").unwrap(), Value::from("steelhead"));
    assert!(trout.is_dirty());
}

#[test]
fn first_applies_a_limit_of_one() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let conn = RecordingConnection::new();
    let session = Session::new(catalog(), conn.clone());

    let found = rt.block_on(async {
        conn.push_reply(vec![fish_row(common::FISH_ID, "trout", None)]);
        unwrap_outcome(session.query("fish").unwrap().first(&cx).await)
    });
    assert!(found.is_some());
    assert!(conn.statements()[0].ends_with("LIMIT 1"));

    let missing = rt.block_on(async {
        unwrap_outcome(session.query("types").unwrap().first(&cx).await)
    });
    assert!(missing.is_none());
}

#[test]
fn projected_queries_return_rows_not_entities() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let conn = RecordingConnection::new();
    let session = Session::new(catalog(), conn.clone());

    let outcome = rt.block_on(async {
        session
            .query("fish")
            .unwrap()
            .columns(&["name"])
            .unwrap()
            .all(&cx)
            .await
    });
    assert!(matches!(outcome, Outcome::Err(Error::Query(_))));

    let rows = rt.block_on(async {
        conn.push_reply(vec![Row::from_pairs(vec![(
            "name",
            Value::from("trout"),
        )])]);
        unwrap_outcome(
            session
                .query("fish")
                .unwrap()
                .columns(&["name"])
                .unwrap()
                .rows(&cx)
                .await,
        )
    });
    assert_eq!(rows.len(), 1);
    assert_eq!(
        conn.statements().last().unwrap(),
        "SELECT \"name\" FROM \"fish\""
    );
}

#[test]
fn bulk_delete_evicts_mapped_matches() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let conn = RecordingConnection::new();
    let session = Session::new(catalog(), conn.clone());

    let trout = rt.block_on(async {
        conn.push_reply(vec![fish_row(common::FISH_ID, "trout", None)]);
        let mut all = unwrap_outcome(session.query("fish").unwrap().all(&cx).await);
        all.remove(0)
    });
    assert!(session.contains(&trout));

    let deleted = rt.block_on(async {
        conn.push_reply(vec![Row::from_pairs(vec![(
            "id",
            Value::from(common::FISH_ID),
        )])]);
        unwrap_outcome(
            session
                .query("fish")
                .unwrap()
                .filter(
                    vec![Cond::eq("name", "trout")],
                    Conjunctive::And,
                )
                .unwrap()
                .delete(&cx)
                .await,
        )
    });
    assert_eq!(deleted, 1);
    assert_eq!(
        conn.statements().last().unwrap(),
        "DELETE FROM \"fish\" WHERE \"name\" = $1 RETURNING \"id\""
    );
    assert!(!session.contains(&trout));
    assert!(trout.is_write_locked());
    assert!(!trout.is_bound());
}

#[test]
fn null_comparisons_rewrite_to_is_null() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let conn = RecordingConnection::new();
    let session = Session::new(catalog(), conn.clone());

    rt.block_on(async {
        unwrap_outcome(
            session
                .query("fish")
                .unwrap()
                .filter(
                    vec![Cond::eq("type_id", Value::Null)],
                    Conjunctive::And,
                )
                .unwrap()
                .all(&cx)
                .await,
        );
    });
    let recorded = conn.recorded();
    assert_eq!(
        recorded[0].0,
        "SELECT \"id\", \"name\", \"type_id\" FROM \"fish\" WHERE \"type_id\" IS NULL"
    );
    assert!(recorded[0].1.is_empty());
}
