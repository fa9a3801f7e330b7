//! Name length limits applied before names become ids

use tracing::warn;

/// Truncates over-long names.
#[derive(Debug, Clone)]
pub struct NamingControl {
    service_name_max_length: usize,
    instance_name_max_length: usize,
    endpoint_name_max_length: usize,
}

impl Default for NamingControl {
    fn default() -> Self {
        Self::new(70, 70, 150)
    }
}

impl NamingControl {
    pub fn new(service: usize, instance: usize, endpoint: usize) -> Self {
        Self {
            service_name_max_length: service,
            instance_name_max_length: instance,
            endpoint_name_max_length: endpoint,
        }
    }

    pub fn format_service_name(&self, name: &str) -> String {
        truncate("service", name, self.service_name_max_length)
    }

    pub fn format_instance_name(&self, name: &str) -> String {
        truncate("instance", name, self.instance_name_max_length)
    }

    pub fn format_endpoint_name(&self, name: &str) -> String {
        truncate("endpoint", name, self.endpoint_name_max_length)
    }
}

fn truncate(kind: &'static str, name: &str, max_chars: usize) -> String {
    match name.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            warn!(kind, name, max_chars, "Name too long, truncating");
            name[..cut].to_string()
        }
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_pass_through() {
        assert_eq!(NamingControl::default().format_service_name("checkout"), "checkout");
    }

    #[test]
    fn long_names_cut_on_char_boundaries() {
        let naming = NamingControl::new(3, 2, 4);
        assert_eq!(naming.format_service_name("abcdef"), "abc");
        assert_eq!(naming.format_instance_name("ééé"), "éé");
        assert_eq!(naming.format_endpoint_name("/api"), "/api");
    }
}
