//! Placeholder substitution for proxy auth strings and exit-node hostnames

/// A `{name}`-style template, e.g. `{zone}{session}{country}:{password}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template(String);

impl Template {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn contains(&self, placeholder: &str) -> bool {
        self.0.contains(&format!("{{{}}}", placeholder))
    }

    /// Substitute every `{key}` found in `values`; unknown placeholders are
    /// left untouched.
    pub fn render(&self, values: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(self.0.len() + 32);
        let mut rest = self.0.as_str();

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];

            let Some(end) = tail.find('}') else {
                out.push_str(tail);
                return out;
            };

            let key = &tail[1..end];
            match values.iter().find(|(k, _)| *k == key) {
                Some((_, value)) => out.push_str(value),
                None => out.push_str(&tail[..=end]),
            }
            rest = &tail[end + 1..];
        }

        out.push_str(rest);
        out
    }
}

impl From<&str> for Template {
    fn from(value: &str) -> Self {
        Template::new(value)
    }
}
