//! Action serialization
//!
//! An action is sent as `Action: <Name>` followed by its fields, one per
//! CRLF line, terminated by a blank line.

/// Builder for one manager action.
#[derive(Debug, Clone)]
pub struct Action {
    name: String,
    fields: Vec<(String, String)>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field to the action.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render the action in wire format.
    pub fn to_wire(&self) -> String {
        let mut out = format!("Action: {}\r\n", self.name);
        for (key, value) in &self.fields {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_terminated_block() {
        let wire = Action::new("Login")
            .field("Username", "reporting")
            .field("Secret", "s3cret")
            .to_wire();
        assert_eq!(
            wire,
            "Action: Login\r\nUsername: reporting\r\nSecret: s3cret\r\n\r\n"
        );
    }

    #[test]
    fn bare_action_still_terminates() {
        assert_eq!(Action::new("Logoff").to_wire(), "Action: Logoff\r\n\r\n");
    }
}
