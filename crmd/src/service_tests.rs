use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::tempdir;
use time::Month;

use super::*;

async fn service_with(journal: Journal) -> CrmService {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = LocalStore::from_pool(pool);
    store.init().await.unwrap();
    let fields = Arc::new(FieldMap::standard().unwrap());
    let today = Date::from_calendar_date(2025, Month::March, 10).unwrap();
    CrmService::new(store, fields, journal).with_today(today)
}

async fn service() -> CrmService {
    service_with(Journal::disabled()).await
}

fn add_body(sync_id: &str, name: &str, channel: &str, agent: &str, next: &str) -> String {
    json!({
        "type": "ADD",
        "sync_id": sync_id,
        "Nombre": name,
        "Canal": channel,
        "Asesora": agent,
        "Fecha Próx. Contacto": next
    })
    .to_string()
}

#[tokio::test]
async fn enqueue_json_reports_success_and_replays() {
    let service = service().await;
    let body = add_body("S1", "Ana", "5512345678", "Lucia", "01/03/2025");

    let first = service.enqueue_json(&body).await;
    assert!(first.success);
    assert_eq!(first.sync_id.as_deref(), Some("S1"));

    let replay = service.enqueue_json(&body).await;
    assert!(replay.success);
    assert_eq!(replay.message, "already pending");
    assert_eq!(service.pending_queue().await.unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_and_invalid_requests_fail_without_side_effects() {
    let service = service().await;

    let garbage = service.enqueue_json("{\"type\":\"PATCH\"}").await;
    assert!(!garbage.success);
    assert!(garbage.message.starts_with("invalid request"));

    let missing_channel = service
        .enqueue_json(&json!({ "type": "ADD", "name": "Ana", "agent": "Lucia" }).to_string())
        .await;
    assert!(!missing_channel.success);
    assert!(missing_channel.sync_id.is_none());

    assert!(service.pending_queue().await.unwrap().is_empty());
    assert!(service.all_clients().await.unwrap().is_empty());
}

#[tokio::test]
async fn client_views_use_display_names_and_local_flag() {
    let service = service().await;
    service
        .enqueue_json(&add_body("S1", "Ana", "5512345678", "Lucia", "01/03/2025"))
        .await;

    let clients = service.clients_for_agent("lucia").await.unwrap();
    assert_eq!(clients.len(), 1);
    let ana = &clients[0];
    assert_eq!(ana["Nombre"], "Ana");
    assert_eq!(ana["ID Cliente"], "5512345678");
    assert_eq!(ana["Vigencia"], "Vencido");
    assert_eq!(ana["Validación"], "PENDING");
    assert_eq!(ana["Estado Final"], "Seguimiento");
    assert!(!ana.contains_key("Sync ID"));

    assert!(service.clients_for_agent("Marta").await.unwrap().is_empty());
}

#[tokio::test]
async fn freshness_is_recomputed_on_read() {
    let service = service().await;
    service
        .enqueue_json(&add_body("S1", "Ana", "5512345678", "Lucia", "20/03/2025"))
        .await;
    let before = service.all_clients().await.unwrap();
    assert_eq!(before[0]["Vigencia"], "Vigente");

    let later = service
        .clone()
        .with_today(Date::from_calendar_date(2025, Month::April, 1).unwrap());
    let after = later.all_clients().await.unwrap();
    assert_eq!(after[0]["Vigencia"], "Vencido");
}

#[tokio::test]
async fn agent_stats_count_statuses_and_overdue() {
    let service = service().await;
    service
        .enqueue_json(&add_body("S1", "Ana", "5512345678", "Lucia", "01/03/2025"))
        .await;
    service
        .enqueue_json(&add_body("S2", "Luis", "5587654321", "lucia", "20/03/2025"))
        .await;
    service
        .enqueue_json(&add_body("S3", "Eva", "5511112222", "Marta", ""))
        .await;
    let sold = service
        .enqueue_json(
            &json!({
                "type": "UPDATE",
                "sync_id": "U1",
                "record_id": "5587654321",
                "updates": { "Estado Final": "Vendido" }
            })
            .to_string(),
        )
        .await;
    assert!(sold.success, "{}", sold.message);

    let stats = service.agent_stats("Lucia").await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.in_progress, 1);
    assert_eq!(stats.sold, 1);
    assert_eq!(stats.not_interested, 0);
    assert_eq!(stats.overdue, 1);
    assert_eq!(stats.unconfirmed, 2);
}

#[tokio::test]
async fn journal_tail_shows_request_lifecycle() {
    let dir = tempdir().unwrap();
    let service = service_with(Journal::new(dir.path().join("journal.log"))).await;
    service
        .enqueue_json(&add_body("S1", "Ana", "5512345678", "Lucia", ""))
        .await;
    service
        .enqueue_json(&add_body("S1", "Ana", "5512345678", "Lucia", ""))
        .await;

    let lines = service.journal_tail(10).await.unwrap();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].contains("RECEIVED sync_id=S1 kind=ADD"));
    assert!(lines[1].contains("ENQUEUED sync_id=S1"));
    assert!(lines[3].contains("DUPLICATE sync_id=S1"));
}
