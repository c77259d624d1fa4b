use std::collections::{BTreeMap, HashMap};
use std::fmt;

use thiserror::Error;

use crate::ir::attr::{Attribute, DataType, Place};
use crate::ir::region::{OperationState, Region, ValueId};

/// Errors raised while parsing the compact region text format used in tests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextIrError {
    #[error("line {line}: {message}")]
    Line { line: usize, message: String },
    #[error("{0}")]
    Message(String),
}

impl TextIrError {
    fn new(msg: impl Into<String>) -> Self {
        TextIrError::Message(msg.into())
    }

    fn at(line: usize, msg: impl Into<String>) -> Self {
        TextIrError::Line {
            line,
            message: msg.into(),
        }
    }
}

/// Parses a single region written in a compact MLIR-inspired syntax.
///
/// # Example
/// ```
/// use drr_rs::ir::text_ir::parse_region;
///
/// let region = parse_region(r#"
/// region(%x) {
///   %axis = pd_op.full_int_array() {dtype = dtype<int64>, place = place<cpu>, value = [1]}
///   %sum = pd_op.sum(%x, %axis) {dtype = dtype<float32>, keepdim = false}
///   yield %sum
/// }
/// "#).expect("valid region");
/// assert_eq!(region.len(), 2);
/// assert_eq!(region.outputs().len(), 1);
/// ```
pub fn parse_region(src: &str) -> Result<Region, TextIrError> {
    parse_region_with_symbols(src).map(|parsed| parsed.region)
}

/// Parses a region and keeps the mapping from textual value names to identifiers.
pub fn parse_region_with_symbols(src: &str) -> Result<ParsedRegion, TextIrError> {
    Parser::new(src).parse()
}

/// Region paired with the mapping from textual value names to value identifiers.
#[derive(Debug, Clone)]
pub struct ParsedRegion {
    pub region: Region,
    pub value_names: HashMap<String, ValueId>,
}

impl ParsedRegion {
    pub fn value(&self, name: &str) -> Option<ValueId> {
        self.value_names.get(normalize_value_name(name)).copied()
    }
}

struct Parser<'a> {
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self { source }
    }

    fn parse(&self) -> Result<ParsedRegion, TextIrError> {
        let mut lines = self
            .source
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, strip_comment(line).trim()))
            .filter(|(_, line)| !line.is_empty());

        let (header_line, header) = lines
            .next()
            .ok_or_else(|| TextIrError::new("input is empty"))?;
        let mut region = Region::new();
        let mut value_names: HashMap<String, ValueId> = HashMap::new();

        for name in parse_header(header_line, header)? {
            if value_names.contains_key(&name) {
                return Err(TextIrError::at(
                    header_line,
                    format!("duplicate input `%{name}`"),
                ));
            }
            let value = region.add_input();
            value_names.insert(name, value);
        }

        let mut closed = false;
        let mut outputs: Option<Vec<ValueId>> = None;
        for (line_no, line) in lines.by_ref() {
            if line == "}" {
                closed = true;
                break;
            }
            if outputs.is_some() {
                return Err(TextIrError::at(line_no, "statements after `yield`"));
            }
            if let Some(rest) = line.strip_prefix("yield") {
                outputs = Some(parse_value_list(line_no, rest, &value_names)?);
                continue;
            }
            parse_operation(line_no, line, &mut region, &mut value_names)?;
        }
        if !closed {
            return Err(TextIrError::new("missing `}` to end region body"));
        }
        if let Some((line_no, _)) = lines.next() {
            return Err(TextIrError::at(line_no, "trailing input after region"));
        }

        region
            .set_outputs(outputs.unwrap_or_default())
            .map_err(|err| TextIrError::new(err.to_string()))?;
        Ok(ParsedRegion {
            region,
            value_names,
        })
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_header(line_no: usize, header: &str) -> Result<Vec<String>, TextIrError> {
    let rest = header
        .strip_prefix("region")
        .ok_or_else(|| TextIrError::at(line_no, "region header must start with `region`"))?
        .trim_start();
    let rest = rest
        .strip_suffix('{')
        .ok_or_else(|| TextIrError::at(line_no, "missing `{` to start region body"))?
        .trim_end();
    let inner = rest
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| TextIrError::at(line_no, "region inputs must be parenthesised"))?;
    split_top_level(inner, ',')
        .into_iter()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            let name = name
                .strip_prefix('%')
                .ok_or_else(|| TextIrError::at(line_no, "value names must start with `%`"))?;
            Ok(name.to_string())
        })
        .collect()
}

fn parse_operation(
    line_no: usize,
    line: &str,
    region: &mut Region,
    value_names: &mut HashMap<String, ValueId>,
) -> Result<(), TextIrError> {
    let (result_names, rhs) = if line.starts_with('%') {
        let (lhs, rhs) = line
            .split_once(" = ")
            .ok_or_else(|| TextIrError::at(line_no, "expected `%result = kind(...)`"))?;
        let names = split_top_level(lhs, ',')
            .into_iter()
            .map(|name| normalize_value_name(name.trim()).to_string())
            .collect::<Vec<_>>();
        (names, rhs.trim())
    } else {
        (Vec::new(), line)
    };

    let open = rhs
        .find('(')
        .ok_or_else(|| TextIrError::at(line_no, "missing `(` after operation kind"))?;
    let kind = rhs[..open].trim();
    if kind.is_empty() {
        return Err(TextIrError::at(line_no, "operation kind cannot be empty"));
    }
    let close = find_matching(rhs, open, '(', ')')
        .ok_or_else(|| TextIrError::at(line_no, "missing `)` to close operand list"))?;
    let operands = parse_value_list(line_no, &rhs[open + 1..close], value_names)?;

    let tail = rhs[close + 1..].trim();
    let attrs = if tail.is_empty() {
        BTreeMap::new()
    } else {
        let inner = tail
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| TextIrError::at(line_no, "attributes must be enclosed in `{}`"))?;
        parse_attr_dict(line_no, inner)?
    };

    let mut state = OperationState::new(kind)
        .with_operands(operands)
        .with_results(result_names.len());
    state.attrs = attrs;
    let op = region
        .push(state)
        .map_err(|err| TextIrError::at(line_no, err.to_string()))?;

    let results = region
        .get(op)
        .map(|op| op.results().to_vec())
        .unwrap_or_default();
    for (name, value) in result_names.into_iter().zip(results) {
        if value_names.insert(name.clone(), value).is_some() {
            return Err(TextIrError::at(
                line_no,
                format!("value `%{name}` is defined twice"),
            ));
        }
    }
    Ok(())
}

fn parse_value_list(
    line_no: usize,
    list: &str,
    value_names: &HashMap<String, ValueId>,
) -> Result<Vec<ValueId>, TextIrError> {
    split_top_level(list, ',')
        .into_iter()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            if !name.starts_with('%') {
                return Err(TextIrError::at(
                    line_no,
                    format!("expected value name, found `{name}`"),
                ));
            }
            value_names
                .get(normalize_value_name(name))
                .copied()
                .ok_or_else(|| TextIrError::at(line_no, format!("unknown value `{name}`")))
        })
        .collect()
}

fn parse_attr_dict(
    line_no: usize,
    inner: &str,
) -> Result<BTreeMap<String, Attribute>, TextIrError> {
    let mut attrs = BTreeMap::new();
    for entry in split_top_level(inner, ',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| TextIrError::at(line_no, "attribute must be `name = value`"))?;
        let name = name.trim();
        let value = parse_attribute(value.trim())
            .map_err(|message| TextIrError::at(line_no, format!("attribute `{name}`: {message}")))?;
        if attrs.insert(name.to_string(), value).is_some() {
            return Err(TextIrError::at(
                line_no,
                format!("attribute `{name}` is given twice"),
            ));
        }
    }
    Ok(attrs)
}

/// Parses one attribute literal in the syntax produced by `Attribute`'s `Display`.
pub fn parse_attribute(text: &str) -> Result<Attribute, String> {
    let text = text.trim();
    match text {
        "true" => return Ok(Attribute::Bool(true)),
        "false" => return Ok(Attribute::Bool(false)),
        _ => {}
    }

    if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        let values = inner
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| {
                item.parse::<i64>()
                    .map_err(|_| format!("invalid integer `{item}` in array"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Attribute::IntArray(values));
    }

    if let Some(inner) = text
        .strip_prefix("dtype<")
        .and_then(|t| t.strip_suffix('>'))
    {
        return DataType::from_name(inner.trim())
            .map(Attribute::DataType)
            .ok_or_else(|| format!("unknown dtype `{inner}`"));
    }

    if let Some(inner) = text
        .strip_prefix("place<")
        .and_then(|t| t.strip_suffix('>'))
    {
        return Ok(Attribute::Place(parse_place(inner.trim())?));
    }

    if let Some(inner) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        return Ok(Attribute::Str(unescape(inner)));
    }

    if let Some(bits) = text.strip_prefix("nan:0x") {
        return parse_nan_bits(bits);
    }

    let (number, suffix) = match text.rsplit_once(':') {
        Some((number, suffix)) => (number.trim(), Some(suffix.trim())),
        None => (text, None),
    };
    match suffix {
        Some("i32") => number
            .parse::<i32>()
            .map(Attribute::I32)
            .map_err(|_| format!("invalid i32 `{number}`")),
        Some("i64") => number
            .parse::<i64>()
            .map(Attribute::I64)
            .map_err(|_| format!("invalid i64 `{number}`")),
        Some("f32") => number
            .parse::<f32>()
            .map(Attribute::f32)
            .map_err(|_| format!("invalid f32 `{number}`")),
        Some("f64") => number
            .parse::<f64>()
            .map(Attribute::f64)
            .map_err(|_| format!("invalid f64 `{number}`")),
        Some(other) => Err(format!("unknown numeric suffix `{other}`")),
        None => {
            if let Ok(value) = number.parse::<i64>() {
                Ok(Attribute::I64(value))
            } else {
                number
                    .parse::<f64>()
                    .map(Attribute::f64)
                    .map_err(|_| format!("cannot parse attribute `{text}`"))
            }
        }
    }
}

fn parse_nan_bits(text: &str) -> Result<Attribute, String> {
    match text.split_once(':') {
        Some((bits, suffix)) if suffix.trim() == "f32" => u32::from_str_radix(bits.trim(), 16)
            .map(Attribute::F32)
            .map_err(|_| format!("invalid f32 bits `{bits}`")),
        Some((_, suffix)) => Err(format!("unknown numeric suffix `{}`", suffix.trim())),
        None => u64::from_str_radix(text.trim(), 16)
            .map(Attribute::F64)
            .map_err(|_| format!("invalid f64 bits `{text}`")),
    }
}

fn parse_place(text: &str) -> Result<Place, String> {
    match text {
        "undefined" => Ok(Place::Undefined),
        "cpu" => Ok(Place::Cpu),
        _ => {
            if let Some(device) = text.strip_prefix("gpu:") {
                return device
                    .parse::<u32>()
                    .map(Place::Gpu)
                    .map_err(|_| format!("invalid gpu device `{device}`"));
            }
            let name = text.strip_prefix("custom:").unwrap_or(text);
            if name.is_empty() {
                return Err("place cannot be empty".to_string());
            }
            Ok(Place::Custom(name.to_string()))
        }
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn normalize_value_name(name: &str) -> &str {
    name.trim().trim_start_matches('%')
}

fn find_matching(text: &str, open_idx: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, ch) in text.char_indices().skip_while(|(idx, _)| *idx < open_idx) {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut start = 0usize;
    let mut prev = '\0';
    for (idx, ch) in text.char_indices() {
        if in_string {
            if ch == '"' && prev != '\\' {
                in_string = false;
            }
        } else {
            match ch {
                '"' => in_string = true,
                '[' | '(' | '<' | '{' => depth += 1,
                ']' | ')' | '>' | '}' => depth -= 1,
                _ if ch == separator && depth == 0 => {
                    parts.push(&text[start..idx]);
                    start = idx + ch.len_utf8();
                }
                _ => {}
            }
        }
        prev = ch;
    }
    parts.push(&text[start..]);
    parts
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_region(self, 0, f)
    }
}

fn write_line(f: &mut fmt::Formatter<'_>, indent: usize, line: &str) -> fmt::Result {
    writeln!(f, "{:width$}{line}", "", width = indent * 2)
}

/// Prints `region` with canonical value names: `%argN` for inputs and `%N`
/// for results numbered in program order.
fn fmt_region(region: &Region, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut names: HashMap<ValueId, String> = HashMap::new();
    for (idx, input) in region.inputs().iter().enumerate() {
        names.insert(*input, format!("%arg{idx}"));
    }
    let inputs = region
        .inputs()
        .iter()
        .map(|value| value_name(&names, *value))
        .collect::<Vec<_>>()
        .join(", ");
    write_line(f, indent, &format!("region({inputs}) {{"))?;

    let mut next = 0usize;
    for (_, op) in region.iter() {
        for result in op.results() {
            names.insert(*result, format!("%{next}"));
            next += 1;
        }
        let results = op
            .results()
            .iter()
            .map(|value| value_name(&names, *value))
            .collect::<Vec<_>>()
            .join(", ");
        let operands = op
            .operands()
            .iter()
            .map(|value| value_name(&names, *value))
            .collect::<Vec<_>>()
            .join(", ");

        let mut line = String::new();
        if !results.is_empty() {
            line.push_str(&results);
            line.push_str(" = ");
        }
        line.push_str(&format!("{}({operands})", op.name()));
        if !op.attrs().is_empty() {
            let attrs = op
                .attrs()
                .iter()
                .map(|(name, value)| format!("{name} = {value}"))
                .collect::<Vec<_>>()
                .join(", ");
            line.push_str(&format!(" {{{attrs}}}"));
        }
        write_line(f, indent + 1, &line)?;
        for nested in op.regions() {
            fmt_region(nested, indent + 2, f)?;
        }
    }

    let outputs = region
        .outputs()
        .iter()
        .map(|value| value_name(&names, *value))
        .collect::<Vec<_>>()
        .join(", ");
    if outputs.is_empty() {
        write_line(f, indent + 1, "yield")?;
    } else {
        write_line(f, indent + 1, &format!("yield {outputs}"))?;
    }
    write_line(f, indent, "}")
}

fn value_name(names: &HashMap<ValueId, String>, value: ValueId) -> String {
    names
        .get(&value)
        .cloned()
        .unwrap_or_else(|| format!("%<dangling {}>", value.0))
}
