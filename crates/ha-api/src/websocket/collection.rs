//! `{prefix}/list|create|update|delete` commands over a storage collection

use std::sync::Arc;

use ha_helpers::{Collection, CollectionError, Item, ItemValidator, StorageCollection};
use serde_json::{json, Map, Value};
use tracing::error;

use super::connection::ActiveConnection;
use super::dispatch::{CommandError, WebSocketCommands};
use super::types::error_codes;

/// CRUD commands for one storage collection
///
/// `create_schema` and `update_schema` are JSON schemas for the item
/// fields; the command envelope (`id`, `type` and for update/delete the
/// `{model_name}_id` key) is added on registration. Mutating commands
/// require an admin user.
pub struct StorageCollectionWebsocket<V: ItemValidator> {
    collection: Arc<StorageCollection<V>>,
    api_prefix: String,
    model_name: String,
    create_schema: Value,
    update_schema: Value,
}

impl<V: ItemValidator> StorageCollectionWebsocket<V> {
    /// Create the command set for one collection
    pub fn new(
        collection: Arc<StorageCollection<V>>,
        api_prefix: impl Into<String>,
        model_name: impl Into<String>,
        create_schema: Value,
        update_schema: Value,
    ) -> Self {
        Self {
            collection,
            api_prefix: api_prefix.into(),
            model_name: model_name.into(),
            create_schema,
            update_schema,
        }
    }

    /// Key carrying the item id in update and delete messages
    pub fn item_id_key(&self) -> String {
        format!("{}_id", self.model_name)
    }

    /// Register the `<api_prefix>/list|create|update|delete` commands
    pub fn async_setup(self: Arc<Self>, commands: &WebSocketCommands) -> Result<(), CommandError> {
        let item_id_key = self.item_id_key();

        let command = format!("{}/list", self.api_prefix);
        let this = self.clone();
        commands.register(
            command.clone(),
            Some(command_schema(&command, None, None)),
            false,
            move |conn: Arc<ActiveConnection>, id, _msg| {
                let this = this.clone();
                async move { this.ws_list_item(&conn, id).await }
            },
        )?;

        let command = format!("{}/create", self.api_prefix);
        let this = self.clone();
        commands.register(
            command.clone(),
            Some(command_schema(&command, Some(&self.create_schema), None)),
            true,
            move |conn: Arc<ActiveConnection>, id, msg| {
                let this = this.clone();
                async move { this.ws_create_item(&conn, id, msg).await }
            },
        )?;

        let command = format!("{}/update", self.api_prefix);
        let this = self.clone();
        commands.register(
            command.clone(),
            Some(command_schema(
                &command,
                Some(&self.update_schema),
                Some(&item_id_key),
            )),
            true,
            move |conn: Arc<ActiveConnection>, id, msg| {
                let this = this.clone();
                async move { this.ws_update_item(&conn, id, msg).await }
            },
        )?;

        let command = format!("{}/delete", self.api_prefix);
        let this = self.clone();
        commands.register(
            command.clone(),
            Some(command_schema(&command, None, Some(&item_id_key))),
            true,
            move |conn: Arc<ActiveConnection>, id, msg| {
                let this = this.clone();
                async move { this.ws_delete_item(&conn, id, msg).await }
            },
        )?;

        Ok(())
    }

    /// List all items
    pub async fn ws_list_item(&self, conn: &ActiveConnection, id: u64) {
        let items = self
            .collection
            .async_items()
            .into_iter()
            .map(Value::Object)
            .collect();
        conn.send_result(id, Value::Array(items)).await
    }

    /// Create an item and reply with it
    pub async fn ws_create_item(&self, conn: &ActiveConnection, id: u64, mut msg: Map<String, Value>) {
        msg.remove("id");
        msg.remove("type");

        match self.collection.async_create_item(msg).await {
            Ok(item) => conn.send_result(id, Value::Object(item)).await,
            Err(err) => self.send_collection_error(conn, id, None, err).await,
        }
    }

    /// Update `<model_name>_id` and reply with the new item
    pub async fn ws_update_item(&self, conn: &ActiveConnection, id: u64, mut msg: Map<String, Value>) {
        msg.remove("id");
        msg.remove("type");

        let Some(item_id) = self.take_item_id(conn, id, &mut msg).await else {
            return;
        };

        match self.collection.async_update_item(&item_id, msg).await {
            Ok(item) => conn.send_result(id, Value::Object(item)).await,
            Err(err) => self.send_collection_error(conn, id, Some(&item_id), err).await,
        }
    }

    /// Delete `<model_name>_id`; replies with `null`
    pub async fn ws_delete_item(&self, conn: &ActiveConnection, id: u64, mut msg: Map<String, Value>) {
        let Some(item_id) = self.take_item_id(conn, id, &mut msg).await else {
            return;
        };

        match self.collection.async_delete_item(&item_id).await {
            Ok(()) => conn.send_result(id, Value::Null).await,
            Err(err) => self.send_collection_error(conn, id, Some(&item_id), err).await,
        }
    }

    async fn take_item_id(
        &self,
        conn: &ActiveConnection,
        id: u64,
        msg: &mut Item,
    ) -> Option<String> {
        let key = self.item_id_key();
        match msg.remove(&key) {
            Some(Value::String(item_id)) => Some(item_id),
            _ => {
                conn.send_error(
                    id,
                    error_codes::INVALID_FORMAT,
                    format!("required key not provided @ data['{}']", key),
                )
                .await;
                None
            }
        }
    }

    async fn send_collection_error(
        &self,
        conn: &ActiveConnection,
        id: u64,
        item_id: Option<&str>,
        err: CollectionError,
    ) {
        match err {
            CollectionError::ItemNotFound(missing) => {
                conn.send_error(
                    id,
                    error_codes::NOT_FOUND,
                    format!(
                        "Unable to find {} {}",
                        self.item_id_key(),
                        item_id.unwrap_or(&missing)
                    ),
                )
                .await
            }
            CollectionError::Invalid(message) => {
                conn.send_error(id, error_codes::INVALID_FORMAT, message)
                    .await
            }
            CollectionError::CannotUpdateId => {
                error!(prefix = %self.api_prefix, item_id, "Attempted to change the id of an item");
                conn.send_error(id, error_codes::INVALID_FORMAT, err.to_string())
                    .await
            }
            err => {
                error!(prefix = %self.api_prefix, error = %err, "Collection command failed");
                conn.send_error(id, error_codes::UNKNOWN_ERROR, err.to_string())
                    .await
            }
        }
    }
}

/// Wrap an item schema in the command envelope
fn command_schema(command_type: &str, fields: Option<&Value>, item_id_key: Option<&str>) -> Value {
    let mut schema = match fields {
        Some(Value::Object(fields)) => fields.clone(),
        _ => Map::new(),
    };
    schema.insert("type".to_string(), json!("object"));

    let properties = schema
        .entry("properties")
        .or_insert_with(|| json!({}));
    if let Some(properties) = properties.as_object_mut() {
        properties.insert("id".to_string(), json!({"type": "integer"}));
        properties.insert("type".to_string(), json!({"const": command_type}));
        if let Some(key) = item_id_key {
            properties.insert(key.to_string(), json!({"type": "string"}));
        }
    }

    let required = schema.entry("required").or_insert_with(|| json!([]));
    if let Some(required) = required.as_array_mut() {
        required.push(json!("type"));
        if let Some(key) = item_id_key {
            required.push(json!(key));
        }
    }

    Value::Object(schema)
}
