// src/cli/builtins.rs

use crate::cli::handlers;
use crate::core::resolver::{
    CommandBody, CommandNode, CommandTree, LoadedCommand, NativeHandler, NodeKind, NodeSource,
};

/// Defines a built-in command: a group when `handler` is `None`.
pub struct BuiltinCommand {
    pub path: &'static [&'static str],
    pub help: &'static str,
    pub handler: Option<NativeHandler>,
    pub hidden: bool,
}

const fn group(path: &'static [&'static str], help: &'static str) -> BuiltinCommand {
    BuiltinCommand {
        path,
        help,
        handler: None,
        hidden: false,
    }
}

const fn leaf(path: &'static [&'static str], help: &'static str, handler: NativeHandler) -> BuiltinCommand {
    BuiltinCommand {
        path,
        help,
        handler: Some(handler),
        hidden: false,
    }
}

/// The single source of truth for built-in commands. Parents come before
/// their children.
pub static BUILTINS: &[BuiltinCommand] = &[
    group(&["env"], t!("builtins.env")),
    leaf(&["env", "start"], t!("builtins.env.start"), handlers::env::start),
    leaf(&["env", "stop"], t!("builtins.env.stop"), handlers::env::stop),
    leaf(&["env", "remove"], t!("builtins.env.remove"), handlers::env::remove),
    leaf(&["env", "status"], t!("builtins.env.status"), handlers::env::status),
    leaf(&["env", "list"], t!("builtins.env.list"), handlers::env::list),
    leaf(&["env", "shell"], t!("builtins.env.shell"), handlers::env::shell),
    leaf(&["env", "code"], t!("builtins.env.code"), handlers::env::code),
    leaf(&["env", "run"], t!("builtins.env.run"), handlers::env::run),
    group(&["env", "cache"], t!("builtins.env.cache")),
    leaf(&["env", "cache", "size"], t!("builtins.env.cache.size"), handlers::env::cache_size),
    leaf(&["env", "cache", "clean"], t!("builtins.env.cache.clean"), handlers::env::cache_clean),
    group(&["config"], t!("builtins.config")),
    leaf(&["config", "show"], t!("builtins.config.show"), handlers::config::show),
    leaf(&["config", "path"], t!("builtins.config.path"), handlers::config::path),
    group(&["self"], t!("builtins.self")),
    group(&["self", "dep"], t!("builtins.self.dep")),
    leaf(&["self", "dep", "sync"], t!("builtins.self.dep.sync"), handlers::dep::sync),
    group(&["self", "telemetry"], t!("builtins.self.telemetry")),
    leaf(&["self", "telemetry", "enable"], t!("builtins.self.telemetry.enable"), handlers::telemetry::enable),
    leaf(&["self", "telemetry", "disable"], t!("builtins.self.telemetry.disable"), handlers::telemetry::disable),
    leaf(&["self", "telemetry", "status"], t!("builtins.self.telemetry.status"), handlers::telemetry::status),
    BuiltinCommand {
        hidden: true,
        ..leaf(&["self", "telemetry", "daemon"], t!("builtins.self.telemetry.daemon"), handlers::telemetry::daemon)
    },
    group(&["self", "telemetry", "log"], t!("builtins.self.telemetry.log")),
    leaf(&["self", "telemetry", "log", "show"], t!("builtins.self.telemetry.log.show"), handlers::telemetry::log_show),
    leaf(&["self", "telemetry", "log", "clear"], t!("builtins.self.telemetry.log.clear"), handlers::telemetry::log_clear),
];

/// Inserts every built-in into `tree`. Must run before discovery so that
/// built-ins take precedence.
pub fn register(tree: &mut CommandTree) {
    for builtin in BUILTINS {
        let path: Vec<String> = builtin.path.iter().map(|s| s.to_string()).collect();
        let (kind, body) = match builtin.handler {
            Some(handler) => (NodeKind::Leaf, CommandBody::Native(handler)),
            None => (NodeKind::Group, CommandBody::Group),
        };
        let help = builtin.help;
        let node = CommandNode::new(
            path,
            kind,
            NodeSource::Builtin,
            Box::new(move || {
                Ok(LoadedCommand {
                    help: help.to_string(),
                    features: Vec::new(),
                    body: body.clone(),
                })
            }),
        )
        .hidden(builtin.hidden);
        if let Err(e) = tree.insert(node) {
            log::error!("Built-in command registry is inconsistent: {e}");
        }
    }
}
