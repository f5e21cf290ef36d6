// src/interpolate.rs
//
// =============================================================================
// ESMRUN: TOKEN INTERPOLATOR (v 0.1 )
// =============================================================================
//
// Resolves `@TOKEN@` placeholders in file name templates.
//
// Rules:
// 1. Built-ins: @EXPID@, @NAME@, @DATE@ (case-sensitive, both delimiters required).
// 2. Components may register further private tokens (e.g. @LRES@).
// 3. Unknown tokens are left verbatim.
// 4. One left-to-right pass; substituted values are never re-scanned.

use std::collections::BTreeMap;

use crate::context::RunContext;

const DELIMITER: char = '@';

#[derive(Debug, Clone, Default)]
pub struct Interpolator {
    tokens: BTreeMap<String, String>,
}

impl Interpolator {
    pub fn new(ctx: &RunContext) -> Self {
        Self::default()
            .with_token("EXPID", ctx.expid())
            .with_token("NAME", ctx.name())
            .with_token("DATE", ctx.date_token())
    }

    /// Registers `@<name>@`. `name` is given without delimiters.
    pub fn with_token(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tokens.insert(name.into(), value.into());
        self
    }

    pub fn interpolate(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find(DELIMITER) {
            out.push_str(&rest[..open]);
            let after_open = &rest[open + 1..];

            let known = after_open
                .find(DELIMITER)
                .and_then(|close| self.tokens.get(&after_open[..close]).map(|v| (close, v)));

            match known {
                Some((close, value)) => {
                    out.push_str(value);
                    rest = &after_open[close + 1..];
                }
                None => {
                    // The closing '@' of an unknown token may open the next one.
                    out.push(DELIMITER);
                    rest = after_open;
                }
            }
        }

        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ComponentIdentity, RunContext};
    use chrono::NaiveDate;

    fn ctx() -> RunContext {
        RunContext::new(
            "exp001",
            ComponentIdentity::new("ocean", "1.0", "ocean"),
            NaiveDate::from_ymd_opt(1850, 1, 1).unwrap(),
            "/tmp",
            &["outdata"],
        )
    }

    #[test]
    fn substitutes_builtin_tokens() {
        let interp = Interpolator::new(&ctx());
        assert_eq!(
            interp.interpolate("@EXPID@_@NAME@_out_@DATE@.nc"),
            "exp001_ocean_out_18500101.nc"
        );
    }

    #[test]
    fn unknown_tokens_stay_verbatim() {
        let interp = Interpolator::new(&ctx());
        assert_eq!(interp.interpolate("@FOO@_x"), "@FOO@_x");
        assert_eq!(interp.interpolate("@FOO@NAME@"), "@FOOocean");
        assert_eq!(interp.interpolate("@expid@"), "@expid@");
        assert_eq!(interp.interpolate("trailing@"), "trailing@");
        assert_eq!(interp.interpolate("@@NAME@"), "@ocean");
    }

    #[test]
    fn values_are_not_rescanned() {
        let interp = Interpolator::default()
            .with_token("A", "@B@")
            .with_token("B", "nope");
        assert_eq!(interp.interpolate("@A@"), "@B@");
    }

    #[test]
    fn private_tokens() {
        let interp = Interpolator::new(&ctx()).with_token("LRES", "T63");
        assert_eq!(
            interp.interpolate("@NAME@_@LRES@_@VRES@.nc"),
            "ocean_T63_@VRES@.nc"
        );
    }
}
