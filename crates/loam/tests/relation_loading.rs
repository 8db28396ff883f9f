//! Lazy relation resolution through the session: one-side and many-side
//! loads, eager pairing of freshly loaded members, and serialization with
//! relation includes.

use asupersync::Cx;
use asupersync::runtime::RuntimeBuilder;
use loam::prelude::*;

mod common;
use common::{RecordingConnection, catalog, fish_row, type_row, unwrap_outcome};

#[test]
fn one_side_loads_once_and_caches() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let conn = RecordingConnection::new();
    let session = Session::new(catalog(), conn.clone());

    rt.block_on(async {
        conn.push_reply(vec![fish_row(
            common::FISH_ID,
            "trout",
            Some(common::TYPE_ID),
        )]);
        let trout = unwrap_outcome(session.query("fish").unwrap().all(&cx).await)
            .remove(0);

        conn.push_reply(vec![type_row("freshwater")]);
        let loaded = unwrap_outcome(session.load_one(&cx, &trout, "type").await)
            .expect("type resolves");
        assert_eq!(loaded.get("name").unwrap(), Value::from("freshwater"));
        assert_eq!(
            conn.statements().last().unwrap(),
            "SELECT \"id\", \"name\" FROM \"types\" WHERE \"id\" = $1 LIMIT 1"
        );

        // Second access is served from the resolved view.
        let before = conn.statements().len();
        let again = unwrap_outcome(session.load_one(&cx, &trout, "type").await)
            .expect("still resolved");
        assert!(again.ptr_eq(&loaded));
        assert_eq!(conn.statements().len(), before);

        // And the synchronous accessor now works too.
        assert!(trout.one("type").unwrap().unwrap().ptr_eq(&loaded));
    });
}

#[test]
fn null_foreign_key_resolves_to_no_target_without_a_query() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let conn = RecordingConnection::new();
    let session = Session::new(catalog(), conn.clone());

    rt.block_on(async {
        conn.push_reply(vec![fish_row(common::FISH_ID, "lamprey", None)]);
        let lamprey = unwrap_outcome(session.query("fish").unwrap().all(&cx).await)
            .remove(0);
        let before = conn.statements().len();
        let target = unwrap_outcome(session.load_one(&cx, &lamprey, "type").await);
        assert!(target.is_none());
        assert_eq!(conn.statements().len(), before);
        assert!(lamprey.one("type").unwrap().is_none());
    });
}

#[test]
fn many_side_loads_ordered_and_pairs_member_views() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let conn = RecordingConnection::new();
    let session = Session::new(catalog(), conn.clone());

    rt.block_on(async {
        conn.push_reply(vec![type_row("freshwater")]);
        let host = unwrap_outcome(session.query("types").unwrap().all(&cx).await)
            .remove(0);

        conn.push_reply(vec![
            fish_row(common::FISH_ID, "trout", Some(common::TYPE_ID)),
            fish_row(common::FISH_ID_B, "perch", Some(common::TYPE_ID)),
        ]);
        let members = unwrap_outcome(session.load_many(&cx, &host, "fish").await);
        assert_eq!(members.len(), 2);
        assert_eq!(
            conn.statements().last().unwrap(),
            "SELECT \"id\", \"name\", \"type_id\" FROM \"fish\" WHERE \"type_id\" = $1 ORDER BY \"id\" ASC"
        );

        // Members come back with their one-side view already resolved.
        for member in &members {
            let paired = member.one("type").unwrap().expect("paired view resolved");
            assert!(paired.ptr_eq(&host));
        }

        // The host view is cached; no second round trip.
        let before = conn.statements().len();
        let again = unwrap_outcome(session.load_many(&cx, &host, "fish").await);
        assert_eq!(again.len(), 2);
        assert_eq!(conn.statements().len(), before);
    });
}

#[test]
fn serialize_resolves_included_relations() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let conn = RecordingConnection::new();
    let session = Session::new(catalog(), conn.clone());

    rt.block_on(async {
        conn.push_reply(vec![type_row("freshwater")]);
        let host = unwrap_outcome(session.query("types").unwrap().all(&cx).await)
            .remove(0);

        conn.push_reply(vec![fish_row(
            common::FISH_ID,
            "trout",
            Some(common::TYPE_ID),
        )]);
        let options = SerializeOptions::new().include("fish", SerializeOptions::new());
        let json = unwrap_outcome(session.serialize(&cx, &host, &options).await);

        assert_eq!(json["name"], serde_json::json!("freshwater"));
        let members = json["fish"].as_array().expect("members serialized");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0]["name"], serde_json::json!("trout"));
        assert_eq!(members[0]["type_id"], serde_json::json!(common::TYPE_ID));
    });
}

#[test]
fn serialize_excludes_attributes_and_fails_on_unknown_include() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let conn = RecordingConnection::new();
    let session = Session::new(catalog(), conn.clone());

    rt.block_on(async {
        conn.push_reply(vec![type_row("freshwater")]);
        let host = unwrap_outcome(session.query("types").unwrap().all(&cx).await)
            .remove(0);

        let trimmed = unwrap_outcome(
            session
                .serialize(&cx, &host, &SerializeOptions::new().exclude("id"))
                .await,
        );
        assert!(trimmed.get("id").is_none());
        assert_eq!(trimmed["name"], serde_json::json!("freshwater"));

        let bad = SerializeOptions::new().include("predators", SerializeOptions::new());
        let outcome = session.serialize(&cx, &host, &bad).await;
        assert!(matches!(outcome, Outcome::Err(Error::Schema(_))));
    });
}
