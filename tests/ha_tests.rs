//! Failover, switch-back and read/write split against pairs of mock servers

mod common;

use std::time::Duration;

use common::*;
use dm_rs::constants::{col_type, sql_type, trx_status, MessageType};
use dm_rs::messages::{ExecInfo, ExecuteReply};
use dm_rs::{
    ColumnInfo, Config, Connection, DoSwitch, Error, IsolationLevel, LobLocator, LobMode, ParamInfo, Value,
};

const UPDATE: &str = "UPDATE T SET NAME = ? WHERE ID = ?";
const SELECT: &str = "SELECT ID, NAME FROM T";

/// Answers the shared statements identically on every server
fn cluster_script() -> Script {
    script(|req, ctx| {
        if req.is(MessageType::Prepare) && req.sql() == UPDATE {
            return Some(prepare_reply(
                req,
                ctx,
                vec![
                    ParamInfo::input(col_type::VARCHAR, 50, 0),
                    ParamInfo::input(col_type::INT, 4, 0),
                ],
                vec![],
            ));
        }
        if req.is(MessageType::Execute) && req.stmt_id != 0 && req.sql.is_none() {
            return Some(dml_reply(ctx, sql_type::UPDATE, 1));
        }
        if req.is(MessageType::Execute) && req.sql().starts_with("SELECT") {
            return Some(rows_reply(ctx, &id_name_columns(), numbered_rows(1, 2), 2));
        }
        None
    })
}

fn pair_config(a: &MockServer, b: &MockServer, do_switch: DoSwitch) -> Config {
    let mut config = a
        .config()
        .with_endpoint("127.0.0.1", b.port())
        .with_reconnect(do_switch);
    config.switch_times = 0;
    config
}

/// Leaves a transaction open on `DELETE`
fn trx_script() -> Script {
    let inner = cluster_script();
    script(move |req, ctx| {
        if req.is(MessageType::Execute) && req.sql().starts_with("DELETE") {
            let info = ExecInfo {
                trx_status: trx_status::ACTIVE,
                ..exec_info(sql_type::DELETE, 3)
            };
            return Some(exec_reply(
                ctx,
                ExecuteReply {
                    info,
                    ..Default::default()
                },
            ));
        }
        inner(req, ctx)
    })
}

async fn kill(server: &MockServer) {
    server.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;
}

mod failover_tests {
    use super::*;

    #[tokio::test]
    async fn test_reconnect_switches_endpoint() {
        let a = MockServer::start(cluster_script()).await;
        let b = MockServer::start(cluster_script()).await;
        let conn = Connection::connect_with_config(pair_config(&a, &b, DoSwitch::On))
            .await
            .unwrap();
        assert_eq!(conn.server_info().await.endpoint, format!("127.0.0.1:{}", a.port()));
        assert_eq!(b.count(MessageType::Login), 0);

        kill(&a).await;
        let err = conn.ping().await.unwrap_err();
        match err.kind() {
            Error::ConnectionSwitched { endpoint } => assert_eq!(endpoint, &format!("127.0.0.1:{}", b.port())),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_connection_switched());

        conn.ping().await.unwrap();
        assert_eq!(conn.server_info().await.endpoint, format!("127.0.0.1:{}", b.port()));
        assert_eq!(b.count(MessageType::Ping), 1);
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_without_reconnect_connection_is_bad() {
        let a = MockServer::start(cluster_script()).await;
        let b = MockServer::start(cluster_script()).await;
        let conn = Connection::connect_with_config(pair_config(&a, &b, DoSwitch::Off))
            .await
            .unwrap();

        kill(&a).await;
        let err = conn.query(SELECT, &[]).await.unwrap_err();
        assert!(err.is_bad_connection(), "{err}");
        assert_eq!(err.code(), 6007);
        assert!(conn.is_closed());
        assert_eq!(b.count(MessageType::Login), 0);
    }

    #[tokio::test]
    async fn test_prepared_statement_survives_switch() {
        let a = MockServer::start(cluster_script()).await;
        let b = MockServer::start(cluster_script()).await;
        let conn = Connection::connect_with_config(pair_config(&a, &b, DoSwitch::On))
            .await
            .unwrap();
        let stmt = conn.prepare(UPDATE).await.unwrap();
        let params = [Value::from("x"), Value::Integer(1)];
        assert_eq!(stmt.execute(&params).await.unwrap().rows_affected, 1);

        kill(&a).await;
        let err = stmt.execute(&params).await.unwrap_err();
        assert!(err.is_connection_switched(), "{err}");
        assert!(b.sql_log().contains(&UPDATE.to_string()));

        assert_eq!(stmt.execute(&params).await.unwrap().rows_affected, 1);
        assert_eq!(b.count(MessageType::Execute), 1);
        stmt.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_session_settings_restored_after_switch() {
        let a = MockServer::start(cluster_script()).await;
        let b = MockServer::start(cluster_script()).await;
        let conn = Connection::connect_with_config(pair_config(&a, &b, DoSwitch::On))
            .await
            .unwrap();
        conn.set_isolation(IsolationLevel::Serializable).await.unwrap();
        conn.set_schema("SALES").await.unwrap();

        kill(&a).await;
        assert!(conn.ping().await.unwrap_err().is_connection_switched());
        assert_eq!(b.count(MessageType::SetIsolation), 1);
        assert!(b.sql_log().contains(&"SET SCHEMA \"SALES\"".to_string()));
        assert_eq!(conn.isolation().await, IsolationLevel::Serializable);
        assert_eq!(conn.schema().await, "SALES");
    }

    #[tokio::test]
    async fn test_lob_prefetch_failure_switches_endpoint() {
        let lob_script = script(|req, ctx| {
            if req.is(MessageType::Execute) && req.sql().starts_with("SELECT DOC") {
                let columns = vec![ColumnInfo::new("DOC", col_type::BLOB)];
                let cell = LobLocator::off_row(9001, 4, false, None).to_cell();
                return Some(rows_reply(ctx, &columns, vec![row(1, vec![Some(cell)])], 1));
            }
            req.is(MessageType::LobOp).then_some(Reply::Hangup)
        });
        let a = MockServer::start(lob_script).await;
        let b = MockServer::start(cluster_script()).await;
        let config = pair_config(&a, &b, DoSwitch::On).with_lob_mode(LobMode::FetchAll);
        let conn = Connection::connect_with_config(config).await.unwrap();

        let err = conn.query("SELECT DOC FROM T", &[]).await.unwrap_err();
        assert!(err.is_connection_switched(), "{err}");
        assert_eq!(a.count(MessageType::LobOp), 1);
        assert_eq!(conn.server_info().await.endpoint, format!("127.0.0.1:{}", b.port()));
        conn.ping().await.unwrap();
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_switch_back_when_preferred_endpoint_recovers() {
        let a = MockServer::start(cluster_script()).await;
        let b = MockServer::start(cluster_script()).await;
        let a_port = a.port();
        let mut config = pair_config(&a, &b, DoSwitch::WhenEpRecover);
        config.switch_interval = Duration::from_millis(50);
        let conn = Connection::connect_with_config(config).await.unwrap();

        kill(&a).await;
        drop(a);
        assert!(conn.ping().await.unwrap_err().is_connection_switched());
        assert_eq!(conn.server_info().await.endpoint, format!("127.0.0.1:{}", b.port()));

        let restarted = MockServer::on_port(a_port, Profile::default(), cluster_script()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        conn.ping().await.unwrap();
        assert_eq!(conn.server_info().await.endpoint, format!("127.0.0.1:{a_port}"));
        assert_eq!(restarted.count(MessageType::Ping), 1);
    }

    #[tokio::test]
    async fn test_no_switch_back_inside_transaction() {
        let a = MockServer::start(trx_script()).await;
        let b = MockServer::start(trx_script()).await;
        let a_port = a.port();
        let mut config = pair_config(&a, &b, DoSwitch::WhenEpRecover).with_auto_commit(false);
        config.switch_interval = Duration::from_millis(50);
        let conn = Connection::connect_with_config(config).await.unwrap();

        kill(&a).await;
        drop(a);
        assert!(conn.ping().await.unwrap_err().is_connection_switched());
        conn.execute("DELETE FROM T", &[]).await.unwrap();
        assert!(!conn.transaction_finished().await);

        let restarted = MockServer::on_port(a_port, Profile::default(), cluster_script()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        conn.ping().await.unwrap();
        assert_eq!(conn.server_info().await.endpoint, format!("127.0.0.1:{}", b.port()));
        assert_eq!(restarted.count(MessageType::Login), 0);

        conn.commit().await.unwrap();
        assert!(conn.transaction_finished().await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        conn.ping().await.unwrap();
        assert_eq!(conn.server_info().await.endpoint, format!("127.0.0.1:{a_port}"));
    }
}

mod rw_split_tests {
    use super::*;

    async fn split_pair(standby_script: Script) -> (MockServer, MockServer, Config) {
        let standby = MockServer::start(standby_script).await;
        let primary = MockServer::with_profile(Profile::default().with_standby(standby.addr()), cluster_script()).await;
        let config = primary.config().with_rw_separate(0);
        (primary, standby, config)
    }

    #[tokio::test]
    async fn test_reads_go_to_standby_writes_to_primary() {
        let (primary, standby, config) = split_pair(cluster_script()).await;
        let conn = Connection::connect_with_config(config).await.unwrap();
        assert_eq!(
            conn.server_info().await.standby,
            Some(format!("127.0.0.1:{}", standby.port()))
        );

        let result = conn.query(SELECT, &[]).await.unwrap();
        assert_eq!(result.row_count(), 2);
        assert!(standby.sql_log().contains(&SELECT.to_string()));
        assert!(!primary.sql_log().contains(&SELECT.to_string()));

        conn.execute("UPDATE T SET NAME = 'x'", &[]).await.unwrap();
        assert!(primary.sql_log().contains(&"UPDATE T SET NAME = 'x'".to_string()));
        assert!(!standby.sql_log().iter().any(|s| s.starts_with("UPDATE")));
    }

    fn selects(server: &MockServer) -> usize {
        server.sql_log().iter().filter(|s| *s == SELECT).count()
    }

    #[tokio::test]
    async fn test_read_share_follows_rw_percent() {
        const CALLS: usize = 1000;
        let standby = MockServer::start(cluster_script()).await;
        let primary = MockServer::with_profile(Profile::default().with_standby(standby.addr()), cluster_script()).await;
        let conn = Connection::connect_with_config(primary.config().with_rw_separate(30))
            .await
            .unwrap();

        for _ in 0..CALLS {
            conn.query(SELECT, &[]).await.unwrap();
        }
        let (on_primary, on_standby) = (selects(&primary), selects(&standby));
        assert_eq!(on_primary + on_standby, CALLS);
        // the distribution counter is shared by every connection in the process
        assert!((250..=350).contains(&on_primary), "primary served {on_primary} of {CALLS}");
    }

    #[tokio::test]
    async fn test_manual_distribution_follows_read_only() {
        let (primary, standby, mut config) = split_pair(cluster_script()).await;
        config.rw_auto_distribute = false;
        let conn = Connection::connect_with_config(config).await.unwrap();

        for _ in 0..10 {
            conn.query(SELECT, &[]).await.unwrap();
        }
        assert_eq!(selects(&primary), 10);
        assert_eq!(selects(&standby), 0);

        conn.set_read_only(true).await.unwrap();
        for _ in 0..10 {
            conn.query(SELECT, &[]).await.unwrap();
        }
        assert_eq!(selects(&primary), 10);
        assert_eq!(selects(&standby), 10);
    }

    #[tokio::test]
    async fn test_settings_reach_both_sessions() {
        let (primary, standby, config) = split_pair(cluster_script()).await;
        let conn = Connection::connect_with_config(config).await.unwrap();

        conn.set_isolation(IsolationLevel::RepeatableRead).await.unwrap();
        assert_eq!(primary.count(MessageType::SetIsolation), 1);
        assert_eq!(standby.count(MessageType::SetIsolation), 1);

        conn.commit().await.unwrap();
        assert_eq!(primary.count(MessageType::Commit), 1);
        assert_eq!(standby.count(MessageType::Commit), 1);
    }

    #[tokio::test]
    async fn test_empty_standby_result_reruns_on_primary() {
        let standby_script = script(|req, ctx| {
            (req.is(MessageType::Execute) && req.sql().starts_with("SELECT"))
                .then(|| rows_reply(ctx, &id_name_columns(), vec![], 0))
        });
        let (primary, standby, mut config) = split_pair(standby_script).await;
        config.rw_ha = true;
        let conn = Connection::connect_with_config(config).await.unwrap();

        let result = conn.query(SELECT, &[]).await.unwrap();
        assert_eq!(result.row_count(), 2);
        assert!(standby.sql_log().contains(&SELECT.to_string()));
        assert!(primary.sql_log().contains(&SELECT.to_string()));
    }

    #[tokio::test]
    async fn test_standby_failure_falls_back_to_primary() {
        let standby_script = script(|req, _| {
            (req.is(MessageType::Execute) && req.sql().starts_with("SELECT")).then_some(Reply::Hangup)
        });
        let (primary, _standby, config) = split_pair(standby_script).await;
        let conn = Connection::connect_with_config(config).await.unwrap();

        let result = conn.query(SELECT, &[]).await.unwrap();
        assert_eq!(result.row_count(), 2);
        assert!(primary.sql_log().contains(&SELECT.to_string()));
        assert!(conn.server_info().await.standby.is_none());
        assert!(!conn.is_closed());

        // reads now stay on the primary
        conn.query(SELECT, &[]).await.unwrap();
        assert_eq!(primary.sql_log().iter().filter(|s| *s == SELECT).count(), 2);
    }
}
