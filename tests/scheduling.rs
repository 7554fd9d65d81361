use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use chairbook::catalog::Catalog;
use chairbook::engine::Engine;
use chairbook::wire;

const CATALOG: &str = r#"{
    "CUT": [{ "kind": "service", "duration_minutes": 30 }],
    "COLOR": [
        { "kind": "service", "duration_minutes": 40 },
        { "kind": "pause", "duration_minutes": 20 },
        { "kind": "service", "duration_minutes": 15 }
    ]
}"#;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("chairbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let catalog = Arc::new(Catalog::from_json(CATALOG).unwrap());
    let engine = Arc::new(Engine::new(dir.join("chairbook.wal"), catalog).unwrap());

    let served = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = served.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "chairbook".to_string()).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("chairbook")
        .user("chairbook")
        .password("chairbook");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn select(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn create_customer(client: &tokio_postgres::Client) -> Ulid {
    let cid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO customers (id, name, phone) VALUES ('{cid}', 'Ana', '555-0100')"
        ))
        .await
        .unwrap();
    cid
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn grouped_booking_round_trip() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let cid = create_customer(&client).await;

    let inserted = client
        .execute(
            &format!(
                "INSERT INTO appointments (customer_id, service_code, start) VALUES ('{cid}', 'COLOR', '2025-03-01T09:00')"
            ),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    let rows = select(&client, "SELECT * FROM appointments").await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("start"), Some("2025-03-01T09:00"));
    assert_eq!(rows[0].get("end"), Some("2025-03-01T09:40"));
    assert_eq!(rows[1].get("start"), Some("2025-03-01T10:00"));
    assert_eq!(rows[1].get("duration_minutes"), Some("15"));
    assert_eq!(rows[1].get("block_index"), Some("2"));

    let gid = rows[0].get("group_id").unwrap().to_string();
    assert_eq!(rows[1].get("group_id"), Some(gid.as_str()));

    let members = select(&client, &format!("SELECT * FROM appointments WHERE group_id = '{gid}'")).await;
    assert_eq!(members.len(), 2);
}

#[tokio::test]
async fn single_block_booking_has_null_group() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let cid = create_customer(&client).await;

    client
        .batch_execute(&format!(
            "INSERT INTO appointments (customer_id, service_code, start) VALUES ('{cid}', 'CUT', '2025-03-01 10:00')"
        ))
        .await
        .unwrap();

    let rows = select(&client, "SELECT * FROM appointments").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("group_id"), None);
    assert_eq!(rows[0].get("service_code"), Some("CUT"));
}

#[tokio::test]
async fn overlapping_booking_is_exclusion_violation() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let cid = create_customer(&client).await;

    client
        .batch_execute(&format!(
            "INSERT INTO appointments (customer_id, service_code, start) VALUES ('{cid}', 'CUT', '2025-03-01T10:00')"
        ))
        .await
        .unwrap();

    let err = client
        .batch_execute(&format!(
            "INSERT INTO appointments (customer_id, service_code, start) VALUES ('{cid}', 'CUT', '2025-03-01T10:15')"
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::EXCLUSION_VIOLATION));

    // Adjacent is fine
    client
        .batch_execute(&format!(
            "INSERT INTO appointments (customer_id, service_code, start) VALUES ('{cid}', 'CUT', '2025-03-01T10:30')"
        ))
        .await
        .unwrap();
    assert_eq!(select(&client, "SELECT * FROM appointments").await.len(), 2);
}

#[tokio::test]
async fn availability_rows_follow_bookings() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let cid = create_customer(&client).await;

    let before = select(&client, "SELECT * FROM availability WHERE start = '2025-03-01T09:30'").await;
    assert_eq!(before.len(), 2);

    client
        .batch_execute(&format!(
            "INSERT INTO appointments (customer_id, service_code, start) VALUES ('{cid}', 'CUT', '2025-03-01T10:00')"
        ))
        .await
        .unwrap();

    let after = select(&client, "SELECT * FROM availability WHERE start = '2025-03-01T09:30'").await;
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].get("service_code"), Some("CUT"));
    let blocks: serde_json::Value = serde_json::from_str(after[0].get("blocks").unwrap()).unwrap();
    assert_eq!(blocks[0]["kind"], "service");
    assert_eq!(blocks[0]["duration_minutes"], 30);

    let color = select(
        &client,
        "SELECT * FROM availability WHERE start = '2025-03-01T09:30' AND service_code = 'COLOR'",
    )
    .await;
    assert!(color.is_empty());
}

#[tokio::test]
async fn deleting_member_cascades_over_wire() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let cid = create_customer(&client).await;

    client
        .batch_execute(&format!(
            "INSERT INTO appointments (customer_id, service_code, start) VALUES ('{cid}', 'COLOR', '2025-03-01T09:00')"
        ))
        .await
        .unwrap();
    let rows = select(&client, "SELECT * FROM appointments").await;
    let last = rows[1].get("id").unwrap().to_string();

    let removed = client
        .execute(&format!("DELETE FROM appointments WHERE id = '{last}'"), &[])
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert!(select(&client, "SELECT * FROM appointments").await.is_empty());
}

#[tokio::test]
async fn unknown_service_and_bad_instant_errors() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let cid = create_customer(&client).await;

    let err = client
        .batch_execute(&format!(
            "INSERT INTO appointments (customer_id, service_code, start) VALUES ('{cid}', 'PERM', '2025-03-01T09:00')"
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::NO_DATA_FOUND));

    let err = client
        .batch_execute(&format!(
            "INSERT INTO appointments (customer_id, service_code, start) VALUES ('{cid}', 'CUT', 'soon')"
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::INVALID_DATETIME_FORMAT));
}

#[tokio::test]
async fn far_future_availability_is_rejected_not_fatal() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;

    let err = client
        .simple_query("SELECT * FROM availability WHERE start = '+262142-12-31T23:50'")
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::INVALID_DATETIME_FORMAT));

    // Same connection keeps serving.
    let rows = select(&client, "SELECT * FROM availability WHERE start = '2025-03-01T09:30'").await;
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn extended_protocol_with_params() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let cid = create_customer(&client).await;

    let cid_text = cid.to_string();
    let inserted = client
        .execute(
            "INSERT INTO appointments (customer_id, start, duration_minutes) VALUES ($1, $2, $3)",
            &[&cid_text, &"2025-03-01T14:00", &"45"],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let rows = client
        .query(
            "SELECT * FROM availability WHERE start = $1 AND service_code = $2",
            &[&"2025-03-01T14:30", &"CUT"],
        )
        .await
        .unwrap();
    assert!(rows.is_empty());

    let rows = client
        .query("SELECT * FROM appointments", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let end: &str = rows[0].get("end");
    assert_eq!(end, "2025-03-01T14:45");
}

#[tokio::test]
async fn customer_update_and_cascade_delete() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    let cid = create_customer(&client).await;

    client
        .batch_execute(&format!("UPDATE customers SET phone = '555-0199' WHERE id = '{cid}'"))
        .await
        .unwrap();
    let rows = select(&client, "SELECT * FROM customers").await;
    assert_eq!(rows[0].get("name"), Some("Ana"));
    assert_eq!(rows[0].get("phone"), Some("555-0199"));

    client
        .batch_execute(&format!(
            "INSERT INTO appointments (customer_id, service_code, start) VALUES ('{cid}', 'COLOR', '2025-03-01T09:00')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!("DELETE FROM customers WHERE id = '{cid}'"))
        .await
        .unwrap();

    assert!(select(&client, "SELECT * FROM customers").await.is_empty());
    assert!(engine.list_appointments().await.is_empty());
}

#[tokio::test]
async fn reschedule_direct_appointment() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let cid = create_customer(&client).await;

    client
        .batch_execute(&format!(
            "INSERT INTO appointments (customer_id, start) VALUES ('{cid}', '2025-03-01T09:00')"
        ))
        .await
        .unwrap();
    let rows = select(&client, "SELECT * FROM appointments").await;
    assert_eq!(rows[0].get("duration_minutes"), Some("60"));
    let id = rows[0].get("id").unwrap().to_string();

    client
        .batch_execute(&format!(
            "UPDATE appointments SET start = '2025-03-01T11:00' WHERE id = '{id}'"
        ))
        .await
        .unwrap();
    let rows = select(&client, "SELECT * FROM appointments").await;
    assert_eq!(rows[0].get("start"), Some("2025-03-01T11:00"));
    assert_eq!(rows[0].get("end"), Some("2025-03-01T12:00"));
}

#[tokio::test]
async fn services_listed_in_code_order() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;

    let rows = select(&client, "SELECT * FROM services").await;
    let codes: Vec<_> = rows.iter().map(|r| r.get("code").unwrap()).collect();
    assert_eq!(codes, vec!["COLOR", "CUT"]);
    assert_eq!(rows[0].get("total_minutes"), Some("75"));
}

#[tokio::test]
async fn wrong_password_rejected() {
    let (addr, _engine) = start_test_server().await;
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("chairbook")
        .user("chairbook")
        .password("wrong");
    assert!(config.connect(NoTls).await.is_err());
}

#[tokio::test]
async fn concurrent_clients_book_slot_once() {
    let (addr, engine) = start_test_server().await;
    let setup = connect(addr).await;
    let cid = create_customer(&setup).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        handles.push(tokio::spawn(async move {
            let client = connect(addr).await;
            client
                .batch_execute(&format!(
                    "INSERT INTO appointments (customer_id, service_code, start) VALUES ('{cid}', 'COLOR', '2025-03-01T09:00')"
                ))
                .await
                .is_ok()
        }));
    }
    let mut ok = 0;
    for h in handles {
        if h.await.unwrap() {
            ok += 1;
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(engine.list_appointments().await.len(), 2);
}
