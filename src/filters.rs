//! Custom askama filters.

/// Leading characters a spreadsheet may read as the start of a formula.
const FORMULA_TRIGGERS: [char; 6] = ['=', '@', '+', '-', '\t', '\r'];

/// Quotes a CSV field when needed and defuses spreadsheet formulas.
pub fn csv<T: std::fmt::Display>(value: T) -> ::askama::Result<String> {
    let value = value.to_string();
    let value = if value.starts_with(FORMULA_TRIGGERS) {
        format!("'{value}")
    } else {
        value
    };
    if value.contains([',', '"', '\n', '\r']) {
        Ok(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(csv("Pune").unwrap(), "Pune");
        assert_eq!(csv("12 MG Road, Kothrud").unwrap(), "\"12 MG Road, Kothrud\"");
        assert_eq!(csv("say \"hi\"").unwrap(), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn formulas_are_neutralised() {
        assert_eq!(csv("=SUM(A1:A9)").unwrap(), "'=SUM(A1:A9)");
        assert_eq!(csv("@HYPERLINK(\"x\")").unwrap(), "\"'@HYPERLINK(\"\"x\"\")\"");
        assert_eq!(csv("-2+3+cmd|' /C calc'!A0").unwrap(), "'-2+3+cmd|' /C calc'!A0");
        assert_eq!(csv("\t=1+1").unwrap(), "'\t=1+1");
        assert_eq!(csv("\r=1+1").unwrap(), "\"'\r=1+1\"");
    }

    #[test]
    fn phone_numbers_keep_their_digits() {
        assert_eq!(csv("+91 98000 00000").unwrap(), "'+91 98000 00000");
        assert_eq!(csv("98000 00000").unwrap(), "98000 00000");
    }
}
