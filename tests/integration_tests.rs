//! Integration tests for dm-rs against a real DM database
//!
//! These tests require a running DM instance. Set the following environment variables:
//! - DM_HOST: DM host (default: localhost)
//! - DM_PORT: DM port (default: 5236)
//! - DM_USER: DM username (default: SYSDBA)
//! - DM_PASSWORD: DM password (default: SYSDBA001)
//!
//! Run with: cargo test --test integration_tests -- --ignored

use dm_rs::{
    BatchBuilder, BindParam, Config, Connection, Error, IsolationLevel, LobData, Value,
};

/// Get test configuration from environment or use defaults
fn get_test_config() -> Config {
    let host = std::env::var("DM_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port: u16 = std::env::var("DM_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5236);
    let username = std::env::var("DM_USER").unwrap_or_else(|_| "SYSDBA".to_string());
    let password = std::env::var("DM_PASSWORD").unwrap_or_else(|_| "SYSDBA001".to_string());

    Config::new(&host, port, &username, &password)
}

/// Helper to connect using test configuration
async fn connect() -> Result<Connection, Error> {
    let config = get_test_config();
    Connection::connect_with_config(config).await
}

/// Create a scratch table, dropping any leftover from an earlier run
async fn create_table(conn: &Connection, name: &str, columns: &str) {
    let _ = conn.execute(&format!("DROP TABLE {name}"), &[]).await;
    conn.execute(&format!("CREATE TABLE {name} ({columns})"), &[])
        .await
        .expect("Failed to create table");
}

async fn drop_table(conn: &Connection, name: &str) {
    let _ = conn.execute(&format!("DROP TABLE {name}"), &[]).await;
}

mod connection_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires DM database"]
    async fn test_connect_and_close() {
        let conn = connect().await.expect("Failed to connect");
        assert!(!conn.is_closed());

        let info = conn.server_info().await;
        assert!(!info.version.is_empty());
        assert!(info.session_id > 0);

        conn.close().await.expect("Failed to close connection");
        assert!(conn.is_closed());
    }

    #[tokio::test]
    #[ignore = "requires DM database"]
    async fn test_ping() {
        let conn = connect().await.expect("Failed to connect");
        conn.ping().await.expect("Ping failed");
        conn.close().await.expect("Failed to close connection");
    }

    #[tokio::test]
    #[ignore = "requires DM database"]
    async fn test_invalid_credentials() {
        let mut config = get_test_config();
        config.username = "NO_SUCH_USER".to_string();
        config.switch_times = 0;

        let result = Connection::connect_with_config(config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore = "requires DM database"]
    async fn test_connection_string_connect() {
        let host = std::env::var("DM_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("DM_PORT").unwrap_or_else(|_| "5236".to_string());
        let user = std::env::var("DM_USER").unwrap_or_else(|_| "SYSDBA".to_string());
        let password = std::env::var("DM_PASSWORD").unwrap_or_else(|_| "SYSDBA001".to_string());

        let dsn = format!("dm://{user}:{password}@{host}:{port}?rowPrefetch=50&compress=2");
        let conn = Connection::connect(&dsn).await.expect("Failed to connect with DSN");
        conn.ping().await.expect("Ping failed");
        conn.close().await.expect("Failed to close connection");
    }
}

mod query_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires DM database"]
    async fn test_select_from_dual() {
        let conn = connect().await.expect("Failed to connect");

        let result = conn
            .query("SELECT 1 AS ONE, 'hello' AS GREETING FROM DUAL", &[])
            .await
            .expect("Query failed");
        assert_eq!(result.row_count(), 1);
        let row = result.first().unwrap();
        assert_eq!(row.get_i64(0), Some(1));
        assert_eq!(row.get_by_name("greeting").and_then(Value::as_str), Some("hello"));

        conn.close().await.expect("Failed to close connection");
    }

    #[tokio::test]
    #[ignore = "requires DM database"]
    async fn test_bind_parameters() {
        let conn = connect().await.expect("Failed to connect");

        let result = conn
            .query("SELECT ? + 1, ? FROM DUAL", &[Value::Integer(41), Value::from("bound")])
            .await
            .expect("Query failed");
        let row = result.first().unwrap();
        assert_eq!(row.get_i64(0), Some(42));
        assert_eq!(row.get_string(1), Some("bound"));

        conn.close().await.expect("Failed to close connection");
    }

    #[tokio::test]
    #[ignore = "requires DM database"]
    async fn test_fetch_many_windows() {
        let mut config = get_test_config();
        config.row_prefetch = 7;
        let conn = Connection::connect_with_config(config).await.expect("Failed to connect");

        let mut rows = conn
            .query_rows("SELECT LEVEL FROM DUAL CONNECT BY LEVEL <= 100", &[])
            .await
            .expect("Query failed");
        let mut expected = 1;
        while let Some(row) = rows.next().await.expect("Fetch failed") {
            assert_eq!(row.get_i64(0), Some(expected));
            expected += 1;
        }
        assert_eq!(expected, 101);
        rows.close().await.expect("Failed to close rows");

        conn.close().await.expect("Failed to close connection");
    }

    #[tokio::test]
    #[ignore = "requires DM database"]
    async fn test_syntax_error_keeps_connection() {
        let conn = connect().await.expect("Failed to connect");

        let err = conn.query("SELECT * FORM DUAL", &[]).await.unwrap_err();
        assert!(matches!(err.kind(), Error::Server { .. }), "{err}");
        assert!(err.code() < 0);

        conn.ping().await.expect("connection should survive a server error");
        conn.close().await.expect("Failed to close connection");
    }
}

mod dml_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires DM database"]
    async fn test_insert_update_delete() {
        let conn = connect().await.expect("Failed to connect");
        create_table(&conn, "DMRS_DML", "ID INT PRIMARY KEY, NAME VARCHAR(50)").await;

        let inserted = conn
            .execute("INSERT INTO DMRS_DML VALUES (?, ?)", &[Value::Integer(1), Value::from("a")])
            .await
            .expect("Insert failed");
        assert_eq!(inserted.rows_affected, 1);

        let updated = conn
            .execute("UPDATE DMRS_DML SET NAME = ? WHERE ID = ?", &[Value::from("b"), Value::Integer(1)])
            .await
            .expect("Update failed");
        assert_eq!(updated.rows_affected, 1);

        let result = conn.query("SELECT NAME FROM DMRS_DML", &[]).await.expect("Query failed");
        assert_eq!(result.rows[0].get_string(0), Some("b"));

        let deleted = conn.execute("DELETE FROM DMRS_DML", &[]).await.expect("Delete failed");
        assert_eq!(deleted.rows_affected, 1);

        drop_table(&conn, "DMRS_DML").await;
        conn.close().await.expect("Failed to close connection");
    }

    #[tokio::test]
    #[ignore = "requires DM database"]
    async fn test_batch_insert() {
        let conn = connect().await.expect("Failed to connect");
        create_table(&conn, "DMRS_BATCH", "ID INT PRIMARY KEY, NAME VARCHAR(50)").await;

        let rows = (1..=50)
            .map(|i| vec![Value::Integer(i), Value::from(format!("row{i}"))])
            .collect();
        let batch = BatchBuilder::new("INSERT INTO DMRS_BATCH VALUES (?, ?)").add_rows(rows).build();
        let result = conn.execute_batch(&batch).await.expect("Batch failed");
        assert_eq!(result.rows_affected, 50);

        let count = conn
            .query("SELECT COUNT(*) FROM DMRS_BATCH", &[])
            .await
            .expect("Query failed");
        assert_eq!(count.rows[0].get_i64(0), Some(50));

        drop_table(&conn, "DMRS_BATCH").await;
        conn.close().await.expect("Failed to close connection");
    }

    #[tokio::test]
    #[ignore = "requires DM database"]
    async fn test_batch_duplicate_key() {
        let mut config = get_test_config();
        config.continue_batch_on_error = true;
        let conn = Connection::connect_with_config(config).await.expect("Failed to connect");
        create_table(&conn, "DMRS_BATCH_ERR", "ID INT PRIMARY KEY").await;

        let batch = BatchBuilder::new("INSERT INTO DMRS_BATCH_ERR VALUES (?)")
            .add_row(vec![Value::Integer(1)])
            .add_row(vec![Value::Integer(1)])
            .add_row(vec![Value::Integer(2)])
            .build();
        let err = conn.execute_batch(&batch).await.unwrap_err();
        match err.kind() {
            Error::BpWithError { details, .. } => assert_eq!(details[0].row, 1),
            other => panic!("expected partial failure, got {other:?}"),
        }

        drop_table(&conn, "DMRS_BATCH_ERR").await;
        conn.close().await.expect("Failed to close connection");
    }
}

mod transaction_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires DM database"]
    async fn test_rollback_discards_changes() {
        let conn = connect().await.expect("Failed to connect");
        create_table(&conn, "DMRS_TXN", "ID INT").await;

        conn.set_auto_commit(false).await.unwrap();
        conn.execute("INSERT INTO DMRS_TXN VALUES (1)", &[]).await.unwrap();
        assert!(!conn.transaction_finished().await);
        conn.rollback().await.unwrap();
        assert!(conn.transaction_finished().await);

        let count = conn.query("SELECT COUNT(*) FROM DMRS_TXN", &[]).await.unwrap();
        assert_eq!(count.rows[0].get_i64(0), Some(0));

        conn.execute("INSERT INTO DMRS_TXN VALUES (2)", &[]).await.unwrap();
        conn.commit().await.unwrap();
        let count = conn.query("SELECT COUNT(*) FROM DMRS_TXN", &[]).await.unwrap();
        assert_eq!(count.rows[0].get_i64(0), Some(1));

        conn.set_auto_commit(true).await.unwrap();
        drop_table(&conn, "DMRS_TXN").await;
        conn.close().await.expect("Failed to close connection");
    }

    #[tokio::test]
    #[ignore = "requires DM database"]
    async fn test_session_settings() {
        let conn = connect().await.expect("Failed to connect");

        conn.set_isolation(IsolationLevel::Serializable).await.unwrap();
        assert_eq!(conn.isolation().await, IsolationLevel::Serializable);
        conn.set_isolation(IsolationLevel::ReadCommitted).await.unwrap();

        conn.set_schema("SYSDBA").await.unwrap();
        assert_eq!(conn.schema().await, "SYSDBA");

        conn.close().await.expect("Failed to close connection");
    }
}

mod procedure_tests {
    use super::*;
    use dm_rs::constants::col_type;

    #[tokio::test]
    #[ignore = "requires DM database"]
    async fn test_out_parameters_and_cursor() {
        let conn = connect().await.expect("Failed to connect");
        conn.execute(
            "CREATE OR REPLACE PROCEDURE DMRS_PROC(A IN INT, B OUT VARCHAR(20), C OUT SYS_REFCURSOR) AS \
             BEGIN B := 'doubled'; OPEN C FOR SELECT A * 2 FROM DUAL; END;",
            &[],
        )
        .await
        .expect("Failed to create procedure");

        let result = conn
            .call(
                "CALL DMRS_PROC(?, ?, ?)",
                &[
                    BindParam::input(21),
                    BindParam::output(col_type::VARCHAR, 20),
                    BindParam::output_cursor(),
                ],
            )
            .await
            .expect("Call failed");
        assert_eq!(result.get_string(1), Some("doubled"));

        let cursor = result.get_cursor(2).expect("cursor output");
        let mut rows = conn.open_cursor(cursor).await.unwrap().expect("cursor rows");
        let row = rows.next().await.unwrap().expect("one row");
        assert_eq!(row.get_i64(0), Some(42));
        rows.close().await.unwrap();

        let _ = conn.execute("DROP PROCEDURE DMRS_PROC", &[]).await;
        conn.close().await.expect("Failed to close connection");
    }
}

mod lob_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires DM database"]
    async fn test_blob_round_trip() {
        let conn = connect().await.expect("Failed to connect");
        create_table(&conn, "DMRS_LOB", "ID INT, DATA BLOB").await;

        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        conn.execute(
            "INSERT INTO DMRS_LOB VALUES (?, ?)",
            &[Value::Integer(1), Value::Bytes(payload.clone())],
        )
        .await
        .expect("Insert failed");

        let result = conn.query("SELECT DATA FROM DMRS_LOB", &[]).await.unwrap();
        let lob = result.rows[0].get(0).and_then(Value::as_lob).cloned().expect("lob");
        assert_eq!(conn.lob_length(&lob).await.unwrap(), payload.len() as i64);
        match conn.read_lob_all(&lob).await.unwrap() {
            LobData::Bytes(bytes) => assert_eq!(&bytes[..], &payload[..]),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(conn.read_lob(&lob, 10, 5).await.unwrap(), payload[10..15].to_vec());

        drop_table(&conn, "DMRS_LOB").await;
        conn.close().await.expect("Failed to close connection");
    }
}
