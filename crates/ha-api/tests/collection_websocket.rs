//! CRUD commands over a storage collection, driven through the dispatcher

use std::sync::Arc;

use async_trait::async_trait;
use ha_api::{ActiveConnection, OutgoingMessage, StorageCollectionWebsocket, User, WebSocketCommands};
use ha_core::{CoreState, SharedCoreState};
use ha_event_bus::EventBus;
use ha_helpers::{Collection, CollectionError, Item, ItemValidator, StorageCollection};
use ha_registries::{MemoryBackend, Storage};
use serde_json::{json, Value};
use tokio::sync::mpsc;

struct TestItems;

#[async_trait]
impl ItemValidator for TestItems {
    async fn process_create_data(&self, data: Item) -> Result<Item, CollectionError> {
        match data.get("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => Ok(data),
            _ => Err(CollectionError::Invalid(
                "required key not provided @ data['name']".into(),
            )),
        }
    }

    fn get_suggested_id(&self, info: &Item) -> String {
        info["name"].as_str().unwrap_or_default().to_string()
    }

    async fn update_data(&self, item: &Item, update_data: Item) -> Result<Item, CollectionError> {
        let mut merged = item.clone();
        merged.extend(update_data);
        Ok(merged)
    }
}

struct Client {
    commands: WebSocketCommands,
    collection: Arc<StorageCollection<TestItems>>,
    conn: Arc<ActiveConnection>,
    rx: mpsc::Receiver<OutgoingMessage>,
    next_id: u64,
}

impl Client {
    fn new(is_admin: bool) -> Self {
        let storage = Storage::with_backend(
            Arc::new(MemoryBackend::new()),
            Arc::new(EventBus::new()),
            SharedCoreState::new(CoreState::Running),
        );
        let collection = Arc::new(StorageCollection::new(
            storage.store("test_item", 1),
            None,
            TestItems,
        ));

        let commands = WebSocketCommands::new();
        Arc::new(StorageCollectionWebsocket::new(
            collection.clone(),
            "test_item/collection",
            "test_item",
            json!({
                "properties": {
                    "name": {"type": "string", "minLength": 1},
                    "icon": {"type": "string"}
                },
                "required": ["name"],
                "additionalProperties": false
            }),
            json!({
                "properties": {
                    "name": {"type": "string", "minLength": 1},
                    "icon": {"type": "string"}
                },
                "additionalProperties": false
            }),
        ))
        .async_setup(&commands)
        .unwrap();

        let (tx, rx) = mpsc::channel(16);
        let user = User {
            id: "user".to_string(),
            name: "User".to_string(),
            is_admin,
        };
        Self {
            commands,
            collection,
            conn: Arc::new(ActiveConnection::new(user, tx)),
            rx,
            next_id: 1,
        }
    }

    async fn send(&mut self, mut message: Value) -> Value {
        message["id"] = json!(self.next_id);
        self.next_id += 1;
        self.commands
            .handle_message(&self.conn, &message.to_string())
            .await;
        serde_json::to_value(self.rx.recv().await.unwrap()).unwrap()
    }
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_create_list_update_delete() {
    let mut client = Client::new(true);

    let msg = client
        .send(json!({"type": "test_item/collection/create", "name": "Mock 3"}))
        .await;
    assert_eq!(msg["success"], true);
    assert_eq!(msg["result"], json!({"id": "mock_3", "name": "Mock 3"}));

    let msg = client
        .send(json!({"type": "test_item/collection/list"}))
        .await;
    assert_eq!(msg["result"], json!([{"id": "mock_3", "name": "Mock 3"}]));

    let msg = client
        .send(json!({
            "type": "test_item/collection/update",
            "test_item_id": "mock_3",
            "icon": "mdi:test"
        }))
        .await;
    assert_eq!(msg["success"], true);
    assert_eq!(
        msg["result"],
        json!({"id": "mock_3", "name": "Mock 3", "icon": "mdi:test"})
    );

    let msg = client
        .send(json!({"type": "test_item/collection/delete", "test_item_id": "mock_3"}))
        .await;
    assert_eq!(msg["success"], true);
    assert_eq!(msg["result"], Value::Null);
    assert!(client.collection.async_items().is_empty());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_create_missing_required_field() {
    let mut client = Client::new(true);

    let msg = client
        .send(json!({"type": "test_item/collection/create", "icon": "mdi:test"}))
        .await;
    assert_eq!(msg["success"], false);
    assert_eq!(msg["error"]["code"], "invalid_format");
    assert!(client.collection.async_items().is_empty());

    // Passes the schema, rejected by the validator
    let msg = client
        .send(json!({"type": "test_item/collection/create", "name": ""}))
        .await;
    assert_eq!(msg["error"]["code"], "invalid_format");
    assert!(client.collection.async_items().is_empty());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_update_unknown_item() {
    let mut client = Client::new(true);

    let msg = client
        .send(json!({
            "type": "test_item/collection/update",
            "test_item_id": "non_existing",
            "name": "Updated name"
        }))
        .await;
    assert_eq!(msg["success"], false);
    assert_eq!(msg["error"]["code"], "not_found");
    assert_eq!(
        msg["error"]["message"],
        "Unable to find test_item_id non_existing"
    );

    let msg = client
        .send(json!({"type": "test_item/collection/delete", "test_item_id": "non_existing"}))
        .await;
    assert_eq!(msg["error"]["code"], "not_found");
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_update_rejects_id_change_and_extra_keys() {
    let mut client = Client::new(true);
    client
        .send(json!({"type": "test_item/collection/create", "name": "Mock"}))
        .await;

    let msg = client
        .send(json!({
            "type": "test_item/collection/update",
            "test_item_id": "mock",
            "colour": "red"
        }))
        .await;
    assert_eq!(msg["error"]["code"], "invalid_format");
    assert_eq!(
        msg["error"]["message"],
        "Message incorrectly formatted: extra keys not allowed @ data['colour']"
    );

    let msg = client
        .send(json!({"type": "test_item/collection/update", "name": "Mock"}))
        .await;
    assert_eq!(msg["error"]["code"], "invalid_format");
    assert_eq!(client.collection.get("mock").unwrap()["name"], "Mock");
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_mutations_require_admin() {
    let mut client = Client::new(false);

    let msg = client
        .send(json!({"type": "test_item/collection/create", "name": "Mock"}))
        .await;
    assert_eq!(msg["error"]["code"], "unauthorized");

    let msg = client
        .send(json!({"type": "test_item/collection/create"}))
        .await;
    assert_eq!(msg["error"]["code"], "invalid_format");

    let msg = client
        .send(json!({"type": "test_item/collection/list"}))
        .await;
    assert_eq!(msg["success"], true);
    assert_eq!(msg["result"], json!([]));
}
