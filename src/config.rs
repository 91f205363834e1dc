use num_cpus;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::warn;
use std::fs::File;
use std::io::prelude::*;

use crate::exception::Exception;
use crate::policy::Policy;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    port: u16,
    local: bool,
    worker_threads: usize,
    #[serde(default = "default_max_connections")]
    max_connections: usize,
    #[serde(default = "default_cache_dir")]
    cache_dir: String,
    #[serde(default = "default_cache_size")]
    cache_size: usize,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default = "default_probe_size")]
    probe_size: usize,
    #[serde(default = "default_max_header_size")]
    max_header_size: usize,
    #[serde(default)]
    policy: Policy,
}

fn default_max_connections() -> usize {
    100
}

fn default_cache_dir() -> String {
    "cache".to_string()
}

fn default_cache_size() -> usize {
    64
}

fn default_chunk_size() -> usize {
    1024
}

// 只读这么多字节来判断重新验证的结果
fn default_probe_size() -> usize {
    30
}

fn default_max_header_size() -> usize {
    64 * 1024
}

impl Config {
    pub fn new() -> Self {
        Self {
            port: 8080,
            local: true,
            worker_threads: 0,
            max_connections: default_max_connections(),
            cache_dir: default_cache_dir(),
            cache_size: default_cache_size(),
            chunk_size: default_chunk_size(),
            probe_size: default_probe_size(),
            max_header_size: default_max_header_size(),
            policy: Policy::default(),
        }
    }

    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let mut file = File::open(filename)
            .map_err(|e| Exception::ConfigUnreadable(format!("{}: {}", filename, e)))?;
        let mut str_val = String::new();
        file.read_to_string(&mut str_val)
            .map_err(|e| Exception::ConfigUnreadable(format!("{}: {}", filename, e)))?;
        Self::from_toml_str(&str_val)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, Exception> {
        let raw_config: Config =
            toml::from_str(text).map_err(|e| Exception::ConfigInvalid(e.to_string()))?;
        Ok(raw_config.normalized())
    }

    fn normalized(mut self) -> Self {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        if self.max_connections == 0 {
            warn!("max_connections被设置为0，这将导致无法处理任何连接，因此该值将被改为{}。", default_max_connections());
            self.max_connections = default_max_connections();
        }
        if self.cache_size == 0 {
            warn!("cache_size被设置为0，但目前尚不支持禁用缓存索引，因此该值将被改为{}。", default_cache_size());
            self.cache_size = default_cache_size();
        }
        if self.chunk_size == 0 {
            self.chunk_size = default_chunk_size();
        }
        if self.probe_size == 0 {
            self.probe_size = default_probe_size();
        }
        if self.max_header_size == 0 {
            warn!("max_header_size被设置为0，这将导致拒绝所有请求，因此该值将被改为{}。", default_max_header_size());
            self.max_header_size = default_max_header_size();
        }
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_cache_dir(mut self, dir: &str) -> Self {
        self.cache_dir = dir.to_string();
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn cache_dir(&self) -> &str {
        &self.cache_dir
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn probe_size(&self) -> usize {
        self.probe_size
    }

    pub fn max_header_size(&self) -> usize {
        self.max_header_size
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }
}
