//! input_boolean and input_number wired to YAML, storage, services and the
//! websocket API

use std::path::Path;
use std::sync::Arc;

use ha_api::{ActiveConnection, OutgoingMessage, User, WebSocketCommands};
use ha_components::{input_boolean, input_number, ComponentContext};
use ha_core::{Context, CoreState, SharedCoreState};
use ha_event_bus::EventBus;
use ha_helpers::collection::SAVE_DELAY;
use ha_registries::{EntityRegistry, MemoryBackend, Storage};
use ha_service_registry::ServiceRegistry;
use ha_state_store::StateStore;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;

const CONFIGURATION: &str = r#"
input_boolean:
  hall:
    name: Hall
    initial: true
  broken:
    initial: maybe
input_number:
  volume:
    name: Volume
    min: 0
    max: 10
    initial: 5
"#;

struct Instance {
    _dir: TempDir,
    ctx: ComponentContext,
    backend: Arc<MemoryBackend>,
    conn: Arc<ActiveConnection>,
    rx: mpsc::Receiver<OutgoingMessage>,
    next_id: u64,
}

impl Instance {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        write_configuration(dir.path(), CONFIGURATION);

        let bus = Arc::new(EventBus::new());
        let backend = Arc::new(MemoryBackend::new());
        let storage = Storage::with_backend(
            backend.clone(),
            bus.clone(),
            SharedCoreState::new(CoreState::Running),
        );
        let entity_registry = Arc::new(EntityRegistry::new(&storage));
        entity_registry.async_load().await.unwrap();

        let ctx = ComponentContext {
            config_dir: dir.path().to_path_buf(),
            states: Arc::new(StateStore::new(bus)),
            services: Arc::new(ServiceRegistry::new()),
            storage,
            entity_registry,
            commands: Arc::new(WebSocketCommands::new()),
        };

        let config = ha_config::load_configuration(dir.path()).unwrap();
        input_boolean::async_setup(&ctx, &config).await.unwrap();
        input_number::async_setup(&ctx, &config).await.unwrap();

        let (tx, rx) = mpsc::channel(16);
        let user = User {
            id: "owner".to_string(),
            name: "Owner".to_string(),
            is_admin: true,
        };

        Self {
            _dir: dir,
            ctx,
            backend,
            conn: Arc::new(ActiveConnection::new(user, tx)),
            rx,
            next_id: 1,
        }
    }

    async fn ws(&mut self, mut message: Value) -> Value {
        message["id"] = json!(self.next_id);
        self.next_id += 1;
        self.ctx
            .commands
            .handle_message(&self.conn, &message.to_string())
            .await;
        serde_json::to_value(self.rx.recv().await.unwrap()).unwrap()
    }

    async fn call(&self, domain: &str, service: &str, data: Value) -> Result<(), String> {
        self.ctx
            .services
            .call(domain, service, data, Context::new())
            .await
            .map_err(|e| e.to_string())
    }

    fn state(&self, entity_id: &str) -> Option<String> {
        self.ctx.states.get(entity_id).map(|s| s.state)
    }
}

fn write_configuration(dir: &Path, contents: &str) {
    std::fs::write(dir.join("configuration.yaml"), contents).unwrap();
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_yaml_entities_are_set_up() {
    let instance = Instance::start().await;

    assert_eq!(instance.state("input_boolean.hall").as_deref(), Some("on"));
    assert!(instance.state("input_boolean.broken").is_none());

    let volume = instance.ctx.states.get("input_number.volume").unwrap();
    assert_eq!(volume.state, "5");
    assert_eq!(volume.attributes["editable"], json!(false));
    assert_eq!(volume.attributes["friendly_name"], json!("Volume"));

    for service in ["turn_on", "turn_off", "toggle", "reload"] {
        assert!(instance.ctx.services.has_service("input_boolean", service));
    }
    for service in ["set_value", "increment", "decrement", "reload"] {
        assert!(instance.ctx.services.has_service("input_number", service));
    }
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_input_boolean_created_over_websocket() {
    let mut instance = Instance::start().await;

    let msg = instance
        .ws(json!({"type": "input_boolean/create", "name": "Porch light"}))
        .await;
    assert_eq!(msg["success"], true);
    assert_eq!(msg["result"], json!({"id": "porch_light", "name": "Porch light"}));

    let state = instance.ctx.states.get("input_boolean.porch_light").unwrap();
    assert_eq!(state.state, "off");
    assert_eq!(state.attributes["editable"], json!(true));

    instance
        .call(
            "input_boolean",
            "toggle",
            json!({"entity_id": "input_boolean.porch_light"}),
        )
        .await
        .unwrap();
    assert_eq!(instance.state("input_boolean.porch_light").as_deref(), Some("on"));

    let msg = instance
        .ws(json!({"type": "input_boolean/create", "name": "Hall"}))
        .await;
    assert_eq!(msg["result"]["id"], "hall_2");

    let msg = instance.ws(json!({"type": "input_boolean/list"})).await;
    assert_eq!(msg["result"].as_array().unwrap().len(), 2);

    tokio::time::sleep(SAVE_DELAY * 2).await;
    let stored = instance.backend.get_json("input_boolean").unwrap();
    assert_eq!(stored["data"]["items"][0]["id"], "porch_light");
    assert_eq!(stored["data"]["items"][1]["id"], "hall_2");
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_reload_follows_configuration() {
    let mut instance = Instance::start().await;
    instance
        .ws(json!({"type": "input_boolean/create", "name": "Porch light"}))
        .await;

    write_configuration(
        &instance.ctx.config_dir,
        "input_boolean:\n  cellar:\n    name: Cellar\n",
    );
    instance
        .call("input_boolean", "reload", json!({}))
        .await
        .unwrap();

    assert!(instance.state("input_boolean.hall").is_none());
    assert_eq!(instance.state("input_boolean.cellar").as_deref(), Some("off"));
    assert!(instance.state("input_boolean.porch_light").is_some());
    // Other domains keep their YAML items until they reload themselves
    assert!(instance.state("input_number.volume").is_some());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_input_number_update_and_delete() {
    let mut instance = Instance::start().await;

    let msg = instance
        .ws(json!({
            "type": "input_number/create",
            "name": "Brightness",
            "min": 0,
            "max": 100,
            "step": 5
        }))
        .await;
    assert_eq!(msg["success"], true);
    let entity_id = "input_number.brightness";

    instance
        .call("input_number", "set_value", json!({"entity_id": entity_id, "value": 80}))
        .await
        .unwrap();
    instance
        .call("input_number", "increment", json!({"entity_id": entity_id}))
        .await
        .unwrap();
    assert_eq!(instance.state(entity_id).as_deref(), Some("85"));

    let err = instance
        .call("input_number", "set_value", json!({"entity_id": entity_id, "value": 101}))
        .await
        .unwrap_err();
    assert!(err.contains("range 0 - 100"));

    let msg = instance
        .ws(json!({
            "type": "input_number/update",
            "input_number_id": "brightness",
            "name": "Brightness",
            "min": 0,
            "max": 50
        }))
        .await;
    assert_eq!(msg["success"], true);
    assert_eq!(instance.state(entity_id).as_deref(), Some("50"));

    let msg = instance
        .ws(json!({
            "type": "input_number/update",
            "input_number_id": "brightness",
            "name": "Brightness",
            "min": 60,
            "max": 50
        }))
        .await;
    assert_eq!(msg["error"]["code"], "invalid_format");
    assert_eq!(
        msg["error"]["message"],
        "Maximum (50) is not greater than minimum (60)"
    );

    let msg = instance
        .ws(json!({"type": "input_number/delete", "input_number_id": "brightness"}))
        .await;
    assert_eq!(msg["result"], Value::Null);
    assert!(instance.state(entity_id).is_none());
    assert!(instance
        .ctx
        .entity_registry
        .async_get_entity_id("input_number", "input_number", "brightness")
        .is_none());

    let msg = instance
        .ws(json!({"type": "input_number/delete", "input_number_id": "brightness"}))
        .await;
    assert_eq!(msg["error"]["code"], "not_found");
    assert_eq!(
        msg["error"]["message"],
        "Unable to find input_number_id brightness"
    );
}
