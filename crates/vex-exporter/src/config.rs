use std::time::Duration;

use vex_common::VarnishVersion;

pub const DEFAULT_NAMESPACE: &str = "varnish";

#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Prefix of every exported metric name.
    pub namespace: String,
    /// Fail decoding on counter properties this exporter does not know.
    pub strict: bool,
    pub params: VarnishstatParams,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            strict: false,
            params: VarnishstatParams::default(),
        }
    }
}

/// Instance selection and wait options passed to every dump invocation.
#[derive(Debug, Clone, Default)]
pub struct VarnishstatParams {
    /// `-n`
    pub instance: Option<String>,
    /// `-N`, not understood before 4.0.
    pub vsm: Option<String>,
    /// `-t`, how long varnishstat waits for a running varnishd. Only 4.1 and
    /// newer accept it.
    pub wait: Option<Duration>,
}

impl VarnishstatParams {
    pub fn is_empty(&self) -> bool {
        self.instance.is_none() && self.vsm.is_none()
    }

    /// Arguments for a JSON dump, gated on what `version` understands.
    pub fn dump_args(&self, version: &VarnishVersion) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(instance) = self.instance.as_deref().filter(|value| !value.is_empty()) {
            args.push("-n".to_string());
            args.push(instance.to_string());
        }
        if let Some(vsm) = self.vsm.as_deref().filter(|value| !value.is_empty())
            && version.is_at_least(4, 0)
        {
            args.push("-N".to_string());
            args.push(vsm.to_string());
        }
        args.push("-j".to_string());
        if let Some(wait) = self.wait
            && version.is_at_least(4, 1)
        {
            args.push("-t".to_string());
            args.push(wait.as_secs().max(1).to_string());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use vex_common::VarnishVersion;

    use super::VarnishstatParams;

    fn params() -> VarnishstatParams {
        VarnishstatParams {
            instance: Some("edge".to_string()),
            vsm: Some("/var/lib/varnish/_.vsm".to_string()),
            wait: Some(Duration::from_secs(2)),
        }
    }

    #[test]
    fn modern_versions_get_every_flag() {
        let args = params().dump_args(&VarnishVersion::new(6, 0, 2));
        assert_eq!(args, [
            "-n",
            "edge",
            "-N",
            "/var/lib/varnish/_.vsm",
            "-j",
            "-t",
            "2"
        ]);
    }

    #[test]
    fn wait_needs_four_one() {
        let args = params().dump_args(&VarnishVersion::new(4, 0, 3));
        assert_eq!(args, ["-n", "edge", "-N", "/var/lib/varnish/_.vsm", "-j"]);
    }

    #[test]
    fn old_and_unknown_versions_get_instance_only() {
        let expected = ["-n", "edge", "-j"];
        assert_eq!(params().dump_args(&VarnishVersion::new(3, 0, 5)), expected);
        assert_eq!(params().dump_args(&VarnishVersion::unresolved()), expected);
    }

    #[test]
    fn defaults_only_request_json() {
        let params = VarnishstatParams::default();
        assert!(params.is_empty());
        assert_eq!(params.dump_args(&VarnishVersion::new(7, 4, 1)), ["-j"]);
    }
}
