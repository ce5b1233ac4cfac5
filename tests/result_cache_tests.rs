//! Result cache behavior
//!
//! The cache is process-wide, so everything runs in one test to keep this
//! binary's view of it deterministic.

mod common;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use dm_rs::buffer::ByteBuffer;
use dm_rs::constants::{sql_type, MessageType};
use dm_rs::messages::{ExecInfo, ExecuteReply, ResultSegment, TableTimestamp};
use dm_rs::{Connection, Value};

const TABLE_ID: i32 = 5;
const SQL: &str = "SELECT ID, NAME FROM T";

fn cacheable_script(stamp: Arc<AtomicI64>) -> Script {
    script(move |req, ctx| {
        if req.is(MessageType::TableTs) {
            let mut out = ByteBuffer::new();
            TableTimestamp::write_list(
                &mut out,
                &[TableTimestamp {
                    table_id: TABLE_ID,
                    timestamp: stamp.load(Ordering::SeqCst),
                }],
            );
            return Some(Reply::Body(out));
        }
        if !(req.is(MessageType::Execute) && req.sql().starts_with("SELECT")) {
            return None;
        }
        let columns = id_name_columns();
        let reply = ExecuteReply {
            info: ExecInfo {
                ret_sql_type: sql_type::SELECT,
                row_count: 3,
                col_count: columns.len() as i16,
                has_result_set: true,
                rs_cache_offset: 1,
                ..Default::default()
            },
            result: Some(ResultSegment {
                columns: Some(columns),
                bdta: false,
                rows: numbered_rows(1, 3),
            }),
            table_ts: vec![TableTimestamp {
                table_id: TABLE_ID,
                timestamp: stamp.load(Ordering::SeqCst),
            }],
            ..Default::default()
        };
        Some(exec_reply(ctx, reply))
    })
}

#[tokio::test]
async fn test_result_cache_hit_and_invalidation() {
    let stamp = Arc::new(AtomicI64::new(1000));
    let server = MockServer::start(cacheable_script(stamp.clone())).await;
    let mut config = server.config().with_result_cache(1);
    config.rs_refresh_freq = Duration::ZERO;
    let conn = Connection::connect_with_config(config).await.unwrap();

    // first run executes and stores
    let first = conn.query(SQL, &[]).await.unwrap();
    assert_eq!(first.row_count(), 3);
    assert_eq!(server.count(MessageType::Execute), 1);
    assert_eq!(server.count(MessageType::TableTs), 0);

    // unchanged stamps: served from the cache after one verification
    let mut rows = conn.query_rows(SQL, &[]).await.unwrap();
    assert!(rows.is_cached());
    let cached = rows.collect().await.unwrap();
    assert_eq!(cached.len(), 3);
    assert_eq!(cached[2].get_string(1), Some("name3"));
    rows.close().await.unwrap();
    assert_eq!(server.count(MessageType::TableTs), 1);
    assert_eq!(server.count(MessageType::Execute), 1);

    // the table changed: the entry is dropped and the query runs again
    stamp.store(2000, Ordering::SeqCst);
    let fresh = conn.query(SQL, &[]).await.unwrap();
    assert_eq!(fresh.row_count(), 3);
    assert_eq!(server.count(MessageType::TableTs), 2);
    assert_eq!(server.count(MessageType::Execute), 2);

    // queries with parameters never touch the cache
    let before = server.count(MessageType::TableTs);
    let _ = conn.query("SELECT ID, NAME FROM T WHERE ID = ?", &[Value::Integer(1)]).await;
    assert_eq!(server.count(MessageType::TableTs), before);

    conn.close().await.unwrap();
}
