//! The controller's own control channel: capability plus route admin.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::debug;

use ltp_transport::MessageHandler;
use ltp_wire::{ErrorCode, Message, ProtocolError};

use crate::controller::Controller;
use crate::engine::RoutingEngine;
use crate::route::RouteMode;
use crate::RouterError;

/// Handler for the controller's admin server: answers
/// `capability_request`, `route_create`, and `route_delete`.
pub struct AdminHandler {
    controller: Arc<Controller>,
    engine: Arc<RoutingEngine>,
}

impl AdminHandler {
    pub fn new(controller: Arc<Controller>, engine: Arc<RoutingEngine>) -> Self {
        Self { controller, engine }
    }
}

impl MessageHandler for AdminHandler {
    fn handle(&self, message: Message) -> BoxFuture<'_, Result<Option<Message>, ProtocolError>> {
        Box::pin(async move {
            match message {
                Message::CapabilityRequest { seq } => {
                    let config = self.controller.config();
                    let device = serde_json::json!({
                        "id": config.device_id,
                        "name": config.display_name,
                        "description": config.description,
                        "protocol_version": ltp_wire::PROTOCOL_VERSION,
                        "routes": self.engine.routes().len(),
                        "sources": self.controller.sources().len(),
                        "sinks": self.controller.sinks().len(),
                    });
                    Ok(Some(Message::CapabilityResponse { seq, device }))
                }
                Message::RouteCreate {
                    seq,
                    name,
                    source_id,
                    sink_id,
                    mode,
                    transform,
                } => {
                    let mode = match mode.as_deref() {
                        None => RouteMode::Proxy,
                        Some(value) => RouteMode::parse(value).ok_or_else(|| {
                            ProtocolError::new(
                                ErrorCode::InvalidValue,
                                format!("unknown route mode: {value}"),
                            )
                        })?,
                    };

                    match self.engine.create_route(
                        &name,
                        &source_id,
                        &sink_id,
                        mode,
                        transform.unwrap_or_default(),
                        true,
                    ) {
                        Ok(route) => Ok(Some(Message::RouteCreateResponse {
                            seq,
                            status: "ok".to_string(),
                            route_id: Some(route.id.clone()),
                        })),
                        Err(RouterError::RouteExists { .. }) => Err(ProtocolError::new(
                            ErrorCode::Busy,
                            format!("route already exists: {source_id} -> {sink_id}"),
                        )),
                        Err(e) => Err(ProtocolError::new(ErrorCode::Internal, e.to_string())),
                    }
                }
                Message::RouteDelete { seq, route_id } => {
                    match self.engine.delete_route(&route_id).await {
                        Ok(()) => Ok(Some(Message::RouteDeleteResponse {
                            seq,
                            status: "ok".to_string(),
                        })),
                        Err(RouterError::RouteNotFound(_)) => Err(ProtocolError::new(
                            ErrorCode::NotFound,
                            format!("unknown route: {route_id}"),
                        )),
                        Err(e) => Err(ProtocolError::new(ErrorCode::Internal, e.to_string())),
                    }
                }
                other => {
                    debug!(msg = other.type_name(), "controller ignoring message");
                    Ok(None)
                }
            }
        })
    }
}
