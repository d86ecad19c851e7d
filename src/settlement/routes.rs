use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{AppResult, SettlementError};
use crate::ledger::models::Chain;

/// A supported (source chain, destination chain, token) transfer path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub source_chain: Chain,
    pub destination_chain: Chain,
    pub token_symbol: String,
}

type RouteKey = (Chain, Chain, String);

/// Explicit whitelist of bridge routes
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<RouteKey, Route>,
}

impl RouteTable {
    pub fn new(routes: impl IntoIterator<Item = Route>) -> Self {
        let mut table = Self::default();
        for route in routes {
            table.insert(route);
        }
        table
    }

    pub fn insert(&mut self, route: Route) {
        let key = (
            route.source_chain,
            route.destination_chain,
            route.token_symbol.to_uppercase(),
        );
        self.routes.insert(key, route);
    }

    /// Look up a route; same-chain transfers are never routable
    pub fn resolve(&self, source: Chain, destination: Chain, token: &str) -> AppResult<Route> {
        let unsupported = || SettlementError::UnsupportedRoute {
            source_chain: source,
            destination_chain: destination,
            token: token.to_string(),
        };

        if source == destination {
            return Err(unsupported().into());
        }

        self.routes
            .get(&(source, destination, token.to_uppercase()))
            .cloned()
            .ok_or_else(|| unsupported().into())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }
}
