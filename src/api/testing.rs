//! Scripted transport for unit tests.

use crate::api::error::ApiError;
use crate::api::transport::{ApiRequest, ApiResponse, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub(crate) enum Scripted {
    Respond(u16, Bytes),
    Unreachable,
}

pub(crate) fn ok(body: Value) -> Scripted {
    Scripted::Respond(200, Bytes::from(body.to_string()))
}

pub(crate) fn status(code: u16, body: Value) -> Scripted {
    Scripted::Respond(code, Bytes::from(body.to_string()))
}

pub(crate) fn raw(code: u16, body: &'static [u8]) -> Scripted {
    Scripted::Respond(code, Bytes::from_static(body))
}

/// Responses are queued per route (`"GET /auth/me"`); the last queued response
/// for a route is repeated once the queue is down to one entry.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    log: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(self, route: &str, response: Scripted) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(route.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self, route: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.route() == route)
            .count()
    }

    pub(crate) fn last(&self, route: &str) -> Option<ApiRequest> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.route() == route)
            .cloned()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let route = request.route();
        self.log.lock().unwrap().push(request);
        let mut routes = self.routes.lock().unwrap();
        let queue = routes
            .get_mut(&route)
            .unwrap_or_else(|| panic!("unscripted request: {route}"));
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().map(|s| match s {
                Scripted::Respond(code, body) => Scripted::Respond(*code, body.clone()),
                Scripted::Unreachable => Scripted::Unreachable,
            })
        };
        match next {
            Some(Scripted::Respond(status, body)) => Ok(ApiResponse { status, body }),
            Some(Scripted::Unreachable) | None => Err(ApiError::transport("connection refused")),
        }
    }
}
