use std::collections::HashMap;
use std::sync::Arc;

use crate::info::GameConfig;
use crate::protocol::{A2sProtocol, MinecraftProtocol, Protocol, TerrariaProtocol};

/// Protocols by name, plus aliases mapping game names onto them.
///
/// Built once and then shared read-only, usually behind an [Arc] inside
/// [crate::QueryEngine].
#[derive(Clone, Default)]
pub struct Registry {
    protocols: Vec<Arc<dyn Protocol>>,
    by_name: HashMap<&'static str, usize>,
    aliases: HashMap<String, &'static str>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("protocols", &self.protocols.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("aliases", &self.aliases)
            .finish()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in protocols: A2S (with the usual Source aliases),
    /// Minecraft and Terraria.
    pub fn with_defaults() -> Self {
        let mut registry: Registry = Registry::new();
        registry.register(Arc::new(A2sProtocol::new()));
        registry.register(Arc::new(MinecraftProtocol::new()));
        registry.register(Arc::new(TerrariaProtocol::new()));
        for alias in ["source", "cs2", "csgo", "gmod", "tf2"] {
            registry.register_alias(alias, "a2s");
        }
        registry
    }

    /// Add `protocol`, aliasing every game it lists to it. A protocol with
    /// the same name replaces the earlier one in place.
    pub fn register(&mut self, protocol: Arc<dyn Protocol>) {
        let name: &'static str = protocol.name();
        for game in protocol.games() {
            if game.name != name {
                self.aliases.insert(game.name.to_owned(), name);
            }
        }
        match self.by_name.get(name) {
            Some(index) => self.protocols[*index] = protocol,
            None => {
                self.by_name.insert(name, self.protocols.len());
                self.protocols.push(protocol);
            }
        }
    }

    pub fn register_alias(&mut self, alias: &str, protocol: &'static str) {
        self.aliases.insert(alias.to_owned(), protocol);
    }

    /// Look up a protocol by its own name or an alias.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Protocol>> {
        let key: &str = self.aliases.get(name).copied().unwrap_or(name);
        self.by_name
            .get(key)
            .map(|index| Arc::clone(&self.protocols[*index]))
    }

    /// Ports for `game`, falling back to the protocol defaults when the
    /// name resolves but is not one of the protocol's listed games.
    pub fn game_config(&self, game: &str) -> Option<(GameConfig, Arc<dyn Protocol>)> {
        let protocol: Arc<dyn Protocol> = self.get(game)?;
        let config: GameConfig = protocol
            .games()
            .iter()
            .find(|config| config.name == game)
            .copied()
            .unwrap_or_else(|| {
                GameConfig::new(
                    protocol.name(),
                    protocol.default_port(),
                    protocol.default_query_port(),
                )
            });
        Some((config, protocol))
    }

    /// Protocols in registration order.
    pub fn protocols(&self) -> &[Arc<dyn Protocol>] {
        &self.protocols
    }

    /// Every protocol name and alias, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_name
            .keys()
            .map(|name| name.to_string())
            .chain(self.aliases.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}
