//! Send statement templates
//!
//! Send statements carry a template string in the device configuration's
//! printf-like convention: `%s` expands to the plug name the script is
//! currently addressing, `%%` is a literal percent sign. Any other `%`
//! directive is rejected when the template is parsed.

use crate::error::ConfigError;

/// A parsed send template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTemplate {
    raw: String,
    wants_plug: bool,
}

impl SendTemplate {
    /// Parse a template, rejecting unknown `%` directives
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut wants_plug = false;
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                continue;
            }
            match chars.next() {
                Some('s') => wants_plug = true,
                Some('%') => {}
                _ => return Err(ConfigError::BadTemplate(raw.to_string())),
            }
        }
        Ok(Self {
            raw: raw.to_string(),
            wants_plug,
        })
    }

    /// Does this template reference the plug name?
    pub fn wants_plug(&self) -> bool {
        self.wants_plug
    }

    /// The unexpanded template text
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Expand the template with the plug currently in scope
    ///
    /// Fails only if the template references `%s` and no plug is in
    /// scope; a compiled script is always run with a plug context when
    /// any of its templates want one.
    pub fn expand(&self, plug: Option<&str>) -> Result<String, ConfigError> {
        if self.wants_plug && plug.is_none() {
            return Err(ConfigError::MissingPlug);
        }

        let mut out = String::with_capacity(self.raw.len());
        let mut chars = self.raw.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                // parse() already validated the directives
                Some('s') => out.push_str(plug.unwrap_or_default()),
                Some('%') => out.push('%'),
                _ => unreachable!("unvalidated template directive"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plain_text_passes_through() {
        let t = SendTemplate::parse("status\r\n").unwrap();
        assert!(!t.wants_plug());
        assert_eq!(t.expand(None).unwrap(), "status\r\n");
    }

    #[test]
    fn plug_directive_expands() {
        let t = SendTemplate::parse("on %s\r\n").unwrap();
        assert!(t.wants_plug());
        assert_eq!(t.expand(Some("3")).unwrap(), "on 3\r\n");
    }

    #[test]
    fn escaped_percent_is_literal() {
        let t = SendTemplate::parse("load %% %s\r\n").unwrap();
        assert_eq!(t.expand(Some("1")).unwrap(), "load % 1\r\n");
    }

    #[test]
    fn unknown_directive_is_rejected() {
        assert!(matches!(
            SendTemplate::parse("on %d\r\n"),
            Err(ConfigError::BadTemplate(_))
        ));
    }

    #[test]
    fn trailing_bare_percent_is_rejected() {
        assert!(SendTemplate::parse("on 1%").is_err());
    }

    #[test]
    fn missing_plug_context_is_an_error() {
        let t = SendTemplate::parse("on %s\r\n").unwrap();
        assert!(matches!(t.expand(None), Err(ConfigError::MissingPlug)));
    }

    proptest! {
        #[test]
        fn expansion_is_total_for_directive_free_text(raw in "[^%]*") {
            let t = SendTemplate::parse(&raw).unwrap();
            prop_assert_eq!(t.expand(None).unwrap(), raw);
        }
    }
}
