//! Placeholder rendering for configured command lines.
//!
//! Recognised placeholders: `{kubectl}`, `{namespace}`, `{session}`,
//! `{deployment}` and `{fragment}`. The last two are empty for commands that
//! are not tied to a single deployment.

use std::collections::BTreeMap;

/// Values substituted into a command template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    values: BTreeMap<&'static str, String>,
}

impl TemplateVars {
    pub fn new(namespace: &str, session: &str) -> Self {
        let mut values = BTreeMap::new();
        values.insert("kubectl", "kubectl".to_string());
        values.insert("namespace", namespace.to_string());
        values.insert("session", session.to_string());
        values.insert("deployment", String::new());
        values.insert("fragment", String::new());
        Self { values }
    }

    pub fn with_target(mut self, fragment: &str, deployment: &str) -> Self {
        self.values.insert("fragment", fragment.to_string());
        self.values.insert("deployment", deployment.to_string());
        self
    }

    /// Binary substituted for `{kubectl}`.
    pub fn with_kubectl(mut self, kubectl: &str) -> Self {
        self.values.insert("kubectl", kubectl.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Substitute every placeholder in every argument.
pub fn render(template: &[String], vars: &TemplateVars) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.values.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{}}}", key), value)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_render_substitutes_all_placeholders() {
        let vars = TemplateVars::new("miniudm", "1a2b3c4d").with_target("uecm", "uecm-deployment");
        let rendered = render(
            &argv(&[
                "kubectl",
                "exec",
                "-n",
                "{namespace}",
                "deploy/{deployment}",
                "--",
                "trace-on",
                "/tmp/{fragment}-{session}.trace",
            ]),
            &vars,
        );
        assert_eq!(rendered[3], "miniudm");
        assert_eq!(rendered[4], "deploy/uecm-deployment");
        assert_eq!(rendered[7], "/tmp/uecm-1a2b3c4d.trace");
    }

    #[test]
    fn test_kubectl_placeholder_follows_configured_binary() {
        let template = argv(&["{kubectl}", "get", "pods", "-n", "{namespace}"]);

        let vars = TemplateVars::new("ns", "s");
        assert_eq!(render(&template, &vars)[0], "kubectl");

        let vars = vars.with_kubectl("/opt/k8s/bin/kubectl");
        assert_eq!(
            render(&template, &vars),
            vec!["/opt/k8s/bin/kubectl", "get", "pods", "-n", "ns"]
        );
    }

    #[test]
    fn test_unknown_placeholders_are_left_alone() {
        let vars = TemplateVars::new("ns", "s");
        assert_eq!(render(&argv(&["{pod}", "{deployment}"]), &vars), vec!["{pod}", ""]);
    }
}
