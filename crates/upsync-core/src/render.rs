//! nginx configuration rendering
//!
//! The document is rebuilt from scratch on every call: one `upstream` block
//! holding a `server` line per instance, followed by a fixed reverse-proxy
//! `server` block on port 80.

use crate::instance::GatewayInstance;
use std::fmt::{self, Write as _};

/// Name of the generated upstream block
pub const UPSTREAM_NAME: &str = "gateway_backend";

const PREAMBLE: &str = "events {\n    worker_connections 1024;\n}\n\nhttp {\n\n";

const PROXY_BLOCK: &str = "    server {
        listen 80;
        location / {
            proxy_pass http://gateway_backend;
            proxy_set_header Host $host;
            proxy_set_header X-Real-IP $remote_addr;
        }
    }
}
";

/// Immutable rendered configuration text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    text: String,
    instance_count: usize,
}

impl RenderedConfig {
    /// Document text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Document bytes, as uploaded
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    /// Length in bytes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Always false; the document has a fixed skeleton
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Number of `server` lines in the upstream block
    #[inline]
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instance_count
    }
}

impl fmt::Display for RenderedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Render the configuration for `instances`, in the order given
#[must_use]
pub fn render(instances: &[GatewayInstance]) -> RenderedConfig {
    let mut text =
        String::with_capacity(PREAMBLE.len() + PROXY_BLOCK.len() + 64 + instances.len() * 48);
    text.push_str(PREAMBLE);
    let _ = writeln!(text, "upstream {UPSTREAM_NAME} {{");
    for instance in instances {
        let _ = writeln!(text, "    {}", instance.server_line());
    }
    text.push_str("}\n\n");
    text.push_str(PROXY_BLOCK);

    RenderedConfig {
        text,
        instance_count: instances.len(),
    }
}
