//! C-style signature text
//!
//! Format: `"return_type function_name(param_type [name], ...)"`, where a
//! type is a scalar name (`int`, `long long`, `double`, `u64`, ...), a
//! pointer (`void*`, `char *`, `ptr`), `void`, or an inline struct
//! `struct{type, type, ...}`.

use crate::error::{DowncallError, DowncallResult};
use crate::layout::{LayoutDescriptor, ScalarKind};

use super::FunctionDescriptor;

/// A parsed signature: symbol name plus native layouts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    pub name: String,
    pub function: FunctionDescriptor,
}

/// Parse a single type. `Ok(None)` means `void`.
pub fn parse_type(text: &str) -> DowncallResult<Option<LayoutDescriptor>> {
    let text = normalize(text);
    if text == "void" {
        return Ok(None);
    }
    if text.ends_with('*') || matches!(text.as_str(), "ptr" | "pointer" | "address") {
        return Ok(Some(LayoutDescriptor::of_pointer()));
    }
    if let Some(body) = text
        .strip_prefix("struct")
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix('{'))
        .and_then(|rest| rest.strip_suffix('}'))
    {
        let mut fields = Vec::new();
        for part in split_top_level(body) {
            match parse_type(part)? {
                Some(layout) => fields.push(layout),
                None => return Err(DowncallError::invalid_layout("struct field cannot be void")),
            }
        }
        return LayoutDescriptor::of_struct(fields).map(Some);
    }
    ScalarKind::from_name(&text)
        .map(|kind| Some(LayoutDescriptor::scalar(kind)))
        .ok_or_else(|| DowncallError::invalid_layout(format!("unknown type '{}'", text)))
}

/// Parse a full signature
pub fn parse_signature(text: &str) -> DowncallResult<ParsedSignature> {
    let text = text.trim();
    let malformed = || DowncallError::invalid_layout(format!("malformed signature '{}'", text));

    let paren = text.find('(').ok_or_else(malformed)?;
    let params = text[paren + 1..].trim_end().strip_suffix(')').ok_or_else(malformed)?;
    let head = text[..paren].trim();

    let (ret_text, name) = head
        .rsplit_once(|c: char| c.is_whitespace() || c == '*')
        .ok_or_else(malformed)?;
    let name = name.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(malformed());
    }
    // Keep the '*' that rsplit_once consumed.
    let ret_text = if head[..head.len() - name.len()].trim_end().ends_with('*') {
        format!("{}*", ret_text.trim_end_matches('*'))
    } else {
        ret_text.to_string()
    };
    let ret = parse_type(&ret_text)?;

    let mut args = Vec::new();
    let params = params.trim();
    if !params.is_empty() && params != "void" {
        for param in split_top_level(params) {
            if param == "..." {
                return Err(DowncallError::invalid_layout(
                    "variadic functions are not supported",
                ));
            }
            args.push(parse_param(param)?);
        }
    }

    let function = match ret {
        Some(layout) => FunctionDescriptor::of(layout, args),
        None => FunctionDescriptor::of_void(args),
    };
    Ok(ParsedSignature {
        name: name.to_string(),
        function,
    })
}

/// A parameter may carry a trailing name (`long long count`, `void *p`)
fn parse_param(text: &str) -> DowncallResult<LayoutDescriptor> {
    let text = text.trim();
    let layout = match parse_type(text) {
        Ok(layout) => layout,
        Err(err) => {
            let Some((ty, name)) = text.rsplit_once(char::is_whitespace) else {
                return Err(err);
            };
            // Stars written against the name belong to the type.
            let stars = name.len() - name.trim_start_matches('*').len();
            let ty = format!("{}{}", ty, "*".repeat(stars));
            parse_type(&ty).map_err(|_| err)?
        }
    };
    layout.ok_or_else(|| DowncallError::invalid_layout("parameter cannot be void"))
}

fn normalize(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.replace(" *", "*")
}

/// Split on commas that are not nested inside braces
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(text[start..].trim());
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::c;

    #[test]
    fn test_parse_scalar_types() {
        assert_eq!(parse_type("int").unwrap(), Some(c::int()));
        assert_eq!(parse_type("long  long").unwrap(), Some(c::long_long()));
        assert_eq!(parse_type("double").unwrap(), Some(c::double()));
        assert_eq!(parse_type("void").unwrap(), None);
        assert_eq!(parse_type("char *").unwrap(), Some(c::pointer()));
        assert!(parse_type("quux").is_err());
    }

    #[test]
    fn test_parse_struct_type() {
        let point = parse_type("struct{i64, i64}").unwrap().unwrap();
        assert_eq!(point.size(), 16);
        assert_eq!(point.fields().len(), 2);

        let nested = parse_type("struct { int, struct{ double, char } }").unwrap().unwrap();
        assert_eq!(nested.size(), 24);
        assert!(parse_type("struct{}").is_err());
    }

    #[test]
    fn test_parse_signature() {
        let sig = parse_signature("int identity(int x)").unwrap();
        assert_eq!(sig.name, "identity");
        assert_eq!(sig.function, FunctionDescriptor::of(c::int(), [c::int()]));

        let sig = parse_signature("void func()").unwrap();
        assert_eq!(sig.function, FunctionDescriptor::of_void([]));

        let sig = parse_signature("void args5(i64, f64, i64, f64, i64)").unwrap();
        assert_eq!(sig.function.argument_layouts().len(), 5);
        assert!(sig.function.return_layout().is_none());

        let sig = parse_signature("struct{i64, i64} identity_struct(struct{i64, i64} p)").unwrap();
        assert_eq!(sig.name, "identity_struct");
        assert!(sig.function.return_layout().unwrap().is_struct());

        let sig = parse_signature("void *identity_memory_address(void *p)").unwrap();
        assert_eq!(sig.name, "identity_memory_address");
        assert_eq!(sig.function, FunctionDescriptor::of(c::pointer(), [c::pointer()]));

        let sig = parse_signature("long long add(long long a, long long b)").unwrap();
        assert_eq!(
            sig.function,
            FunctionDescriptor::of(c::long_long(), [c::long_long(), c::long_long()])
        );
    }

    #[test]
    fn test_parse_signature_errors() {
        assert!(parse_signature("int").is_err());
        assert!(parse_signature("int f(int").is_err());
        assert!(parse_signature("int printf(char*, ...)").is_err());
        assert!(parse_signature("int f(void x)").is_err());
    }
}
