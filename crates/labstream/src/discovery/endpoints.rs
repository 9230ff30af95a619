// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint registry: where probe packets are sent.
//!
//! Built once per resolver from the configuration. Malformed multicast
//! literals and unresolvable peer host names are dropped without failing
//! construction; the remaining endpoints may still reach providers.

use crate::config::ApiConfig;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

/// IP protocol stacks a resolver may probe over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStack {
    /// IPv4 (including broadcast addresses)
    V4,
    /// IPv6
    V6,
}

/// Static multicast endpoints plus expanded unicast endpoints.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    multicast: Vec<SocketAddr>,
    unicast: Vec<SocketAddr>,
    stacks: Vec<ProtocolStack>,
}

impl EndpointRegistry {
    /// Build the registry from configuration.
    ///
    /// Multicast endpoints are the scope-governed address list, each paired
    /// with the multicast port. Unicast endpoints are every resolved address
    /// of every known peer, crossed with the port range
    /// `[base_port, base_port + port_range)`.
    pub fn from_config(cfg: &ApiConfig) -> Self {
        let mut multicast = Vec::new();
        for literal in cfg.effective_multicast_addresses() {
            match literal.parse::<IpAddr>() {
                Ok(addr) => multicast.push(SocketAddr::new(addr, cfg.multicast_port)),
                Err(_) => {
                    log::debug!(
                        "[endpoints] dropping malformed multicast address '{}'",
                        literal
                    );
                }
            }
        }

        let mut unicast = Vec::new();
        for peer in &cfg.known_peers {
            let resolved = match (peer.as_str(), cfg.base_port).to_socket_addrs() {
                Ok(addrs) => addrs,
                Err(e) => {
                    log::debug!("[endpoints] cannot resolve peer '{}': {}", peer, e);
                    continue;
                }
            };
            for addr in resolved {
                for port in cfg.base_port..cfg.base_port.saturating_add(cfg.port_range) {
                    unicast.push(SocketAddr::new(addr.ip(), port));
                }
            }
        }

        let mut stacks = Vec::new();
        if cfg.allow_ipv6() {
            stacks.push(ProtocolStack::V6);
        }
        if cfg.allow_ipv4() {
            stacks.push(ProtocolStack::V4);
        }

        log::debug!(
            "[endpoints] registry built: {} multicast, {} unicast, stacks {:?}",
            multicast.len(),
            unicast.len(),
            stacks
        );
        Self {
            multicast,
            unicast,
            stacks,
        }
    }

    /// Multicast endpoint list (may be empty).
    pub fn multicast(&self) -> &[SocketAddr] {
        &self.multicast
    }

    /// Expanded unicast endpoint list (may be empty).
    pub fn unicast(&self) -> &[SocketAddr] {
        &self.unicast
    }

    /// Protocol stacks allowed by configuration.
    pub fn stacks(&self) -> &[ProtocolStack] {
        &self.stacks
    }
}
