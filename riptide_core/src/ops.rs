use rand::Rng;
use rand_core::RngCore;
use serde_json::{Map, Value, json};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Numeric literals substituted by the `num-boundary` operator: zeros, small
/// steps, the 32/64-bit integer extremes, and the largest finite doubles.
pub const BOUNDARY_LITERALS: &[&str] = &[
    "0",
    "1",
    "-1",
    "2",
    "-2",
    "-0.0",
    "2147483647",
    "-2147483648",
    "4294967295",
    "-4294967296",
    "9223372036854775807",
    "-9223372036854775808",
    "1e308",
    "-1e308",
];

/// UTF-8 sequences that are valid but rarely exercised by ordinary corpora.
const UTF8_EDGE_FRAGMENTS: &[&str] = &[
    "\u{FEFF}",                 // byte order mark
    "\u{202E}",                 // right-to-left override
    "\u{0301}\u{0301}\u{0301}", // stacked combining accents
    "\u{1F4A9}",                // astral plane
    "\u{FFFD}",                 // replacement character
    "\u{FFFF}",                 // noncharacter
    "\u{200B}\u{200D}",         // zero-width space + joiner
    "\u{E9}\u{0301}",           // precomposed + combining accent
];

const KEY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
/// Depth bound for the structural walkers; nodes deeper than this are
/// invisible to the parsed operators, keeping every call cheap.
const MAX_WALK_DEPTH: usize = 16;
/// Upper bound on wraps added by `deep-nest` (lower bound is 8).
const MAX_NEST_WRAP: usize = 48;
/// Hard cap on the bytes `long-string` will generate in one call.
const MAX_LONG_STRING: usize = 64 * 1024;
/// Most members/elements one splice call copies out of the aux buffer.
const MAX_SPLICE_MEMBERS: usize = 4;

/// Signature shared by every mutation operator.
///
/// `None` means the operator's logic cannot apply to this input (for the
/// parsed operators, usually a structural parse failure); the registry then
/// substitutes the unmodified seed. Operators never report errors.
pub type OpFn = fn(&[u8], &[u8], usize, &mut dyn RngCore) -> Option<Vec<u8>>;

/// One entry of the operator catalogue.
pub struct MutationOp {
    pub name: &'static str,
    pub apply: OpFn,
}

/// Truncates `buf` to at most `max_size` bytes.
pub fn clip(buf: &[u8], max_size: usize) -> Vec<u8> {
    let end = buf.len().min(max_size);
    buf[..end].to_vec()
}

/// The ordered, append-only catalogue of mutation operators.
///
/// An operator's identity is its position: phase tables and external tooling
/// reference operators by index, so indices are dense, zero-based, and never
/// reused or reordered. New operators go to the end only, via [`append`].
///
/// [`append`]: OpRegistry::append
pub struct OpRegistry {
    ops: Vec<MutationOp>,
}

impl OpRegistry {
    /// Builds the built-in catalogue. Index assignments are stable:
    ///
    /// 0 `identity`, 1 `flip-bool`, 2 `num-boundary`, 3 `repair-syntax`,
    /// 4 `inject-rare`, 5 `long-string`, 6 `deep-nest`, 7 `utf8-edge`,
    /// 8 `dup-key`, 9 `add-field`, 10 `del-field`, 11 `splice-object`,
    /// 12 `splice-array`.
    pub fn builtin() -> Self {
        Self {
            ops: vec![
                MutationOp { name: "identity", apply: op_identity },
                MutationOp { name: "flip-bool", apply: op_flip_bool },
                MutationOp { name: "num-boundary", apply: op_num_boundary },
                MutationOp { name: "repair-syntax", apply: op_repair_syntax },
                MutationOp { name: "inject-rare", apply: op_inject_rare },
                MutationOp { name: "long-string", apply: op_long_string },
                MutationOp { name: "deep-nest", apply: op_deep_nest },
                MutationOp { name: "utf8-edge", apply: op_utf8_edge },
                MutationOp { name: "dup-key", apply: op_dup_key },
                MutationOp { name: "add-field", apply: op_add_field },
                MutationOp { name: "del-field", apply: op_del_field },
                MutationOp { name: "splice-object", apply: op_splice_object },
                MutationOp { name: "splice-array", apply: op_splice_array },
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn name(&self, idx: usize) -> Option<&'static str> {
        self.ops.get(idx).map(|op| op.name)
    }

    /// Appends a new operator and returns its index.
    ///
    /// Intended for campaign startup, before any trial has run; the caller
    /// is responsible for growing the scheduler's score vector to match
    /// (the engine's `register_op` does both).
    pub fn append(&mut self, op: MutationOp) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    /// Applies operator `idx` to `seed`, total from the caller's viewpoint.
    ///
    /// Every failure mode resolves to the unmodified seed clipped to
    /// `max_size`: an out-of-range index, an operator declining the input
    /// (`None`), or an unexpected panic inside the operator. The result is
    /// always truncated to `max_size`.
    pub fn apply(
        &self,
        idx: usize,
        seed: &[u8],
        aux: &[u8],
        max_size: usize,
        rng: &mut dyn RngCore,
    ) -> Vec<u8> {
        let attempt = catch_unwind(AssertUnwindSafe(|| {
            self.ops
                .get(idx)
                .and_then(|op| (op.apply)(seed, aux, max_size, rng))
        }));
        match attempt {
            Ok(Some(mut out)) => {
                out.truncate(max_size);
                out
            }
            Ok(None) => clip(seed, max_size),
            Err(_) => {
                log::warn!(
                    "Operator {} ({}) panicked, substituting the unmodified seed",
                    idx,
                    self.name(idx).unwrap_or("?")
                );
                clip(seed, max_size)
            }
        }
    }
}

impl Default for OpRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn op_identity(seed: &[u8], _aux: &[u8], max_size: usize, _rng: &mut dyn RngCore) -> Option<Vec<u8>> {
    Some(clip(seed, max_size))
}

/// Toggles one randomly chosen `true`/`false` token. Purely textual, so it
/// works on inputs that do not parse.
fn op_flip_bool(seed: &[u8], _aux: &[u8], _max_size: usize, rng: &mut dyn RngCore) -> Option<Vec<u8>> {
    let mut hits: Vec<(usize, bool)> = Vec::new();
    let mut i = 0;
    while i < seed.len() {
        if seed[i..].starts_with(b"true") {
            hits.push((i, true));
            i += 4;
        } else if seed[i..].starts_with(b"false") {
            hits.push((i, false));
            i += 5;
        } else {
            i += 1;
        }
    }
    if hits.is_empty() {
        return None;
    }

    let (pos, was_true) = hits[rng.random_range(0..hits.len())];
    let (old_len, replacement): (usize, &[u8]) =
        if was_true { (4, b"false") } else { (5, b"true") };
    let mut out = Vec::with_capacity(seed.len() + 1);
    out.extend_from_slice(&seed[..pos]);
    out.extend_from_slice(replacement);
    out.extend_from_slice(&seed[pos + old_len..]);
    Some(out)
}

fn numeric_token_spans(bytes: &[u8]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let starts_number = bytes[i].is_ascii_digit()
            || (bytes[i] == b'-' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit()));
        if starts_number {
            let start = i;
            i += 1;
            while i < bytes.len()
                && matches!(bytes[i], b'0'..=b'9' | b'.' | b'e' | b'E' | b'+' | b'-')
            {
                i += 1;
            }
            spans.push((start, i));
        } else {
            i += 1;
        }
    }
    spans
}

/// Replaces one numeric literal with an extremal value. Textual: the scan is
/// deliberately loose about where a number may appear, since phase-B inputs
/// are often not yet valid JSON.
fn op_num_boundary(seed: &[u8], _aux: &[u8], _max_size: usize, rng: &mut dyn RngCore) -> Option<Vec<u8>> {
    let spans = numeric_token_spans(seed);
    if spans.is_empty() {
        return None;
    }
    let (start, end) = spans[rng.random_range(0..spans.len())];
    let literal = BOUNDARY_LITERALS[rng.random_range(0..BOUNDARY_LITERALS.len())];

    let mut out = Vec::with_capacity(seed.len() + literal.len());
    out.extend_from_slice(&seed[..start]);
    out.extend_from_slice(literal.as_bytes());
    out.extend_from_slice(&seed[end..]);
    Some(out)
}

fn strip_dangling_comma(out: &mut Vec<u8>, changed: &mut bool) {
    let mut end = out.len();
    while end > 0 && out[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    if end > 0 && out[end - 1] == b',' {
        out.remove(end - 1);
        *changed = true;
    }
}

/// Minimal syntax repair: drops a comma dangling before a closer, drops
/// unmatched closers, terminates an open string, and appends the closers an
/// input is missing. Returns None when the input needed no repair.
fn op_repair_syntax(seed: &[u8], _aux: &[u8], _max_size: usize, _rng: &mut dyn RngCore) -> Option<Vec<u8>> {
    let mut out: Vec<u8> = Vec::with_capacity(seed.len() + 8);
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut changed = false;

    for &byte in seed {
        if in_string {
            out.push(byte);
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => {
                in_string = true;
                out.push(byte);
            }
            b'{' | b'[' => {
                stack.push(byte);
                out.push(byte);
            }
            b'}' => {
                if stack.last() == Some(&b'{') {
                    stack.pop();
                    strip_dangling_comma(&mut out, &mut changed);
                    out.push(byte);
                } else {
                    changed = true;
                }
            }
            b']' => {
                if stack.last() == Some(&b'[') {
                    stack.pop();
                    strip_dangling_comma(&mut out, &mut changed);
                    out.push(byte);
                } else {
                    changed = true;
                }
            }
            _ => out.push(byte),
        }
    }

    if in_string {
        out.push(b'"');
        changed = true;
    }
    while let Some(open) = stack.pop() {
        strip_dangling_comma(&mut out, &mut changed);
        out.push(if open == b'{' { b'}' } else { b']' });
        changed = true;
    }

    if changed { Some(out) } else { None }
}

fn parse_json(bytes: &[u8]) -> Option<Value> {
    serde_json::from_slice(bytes).ok()
}

fn to_bytes(value: &Value) -> Option<Vec<u8>> {
    serde_json::to_vec(value).ok()
}

fn random_key(rng: &mut dyn RngCore) -> String {
    (0..8)
        .map(|_| KEY_ALPHABET[rng.random_range(0..KEY_ALPHABET.len())] as char)
        .collect()
}

fn count_objects(value: &Value, depth: usize) -> usize {
    if depth > MAX_WALK_DEPTH {
        return 0;
    }
    match value {
        Value::Object(map) => {
            1 + map
                .values()
                .map(|child| count_objects(child, depth + 1))
                .sum::<usize>()
        }
        Value::Array(items) => items
            .iter()
            .map(|child| count_objects(child, depth + 1))
            .sum(),
        _ => 0,
    }
}

fn nth_object_mut<'a>(
    value: &'a mut Value,
    target: &mut usize,
    depth: usize,
) -> Option<&'a mut Map<String, Value>> {
    if depth > MAX_WALK_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            if *target == 0 {
                return Some(map);
            }
            *target -= 1;
            for child in map.values_mut() {
                if let Some(found) = nth_object_mut(child, target, depth + 1) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                if let Some(found) = nth_object_mut(child, target, depth + 1) {
                    return Some(found);
                }
            }
            None
        }
        _ => None,
    }
}

fn count_arrays(value: &Value, depth: usize) -> usize {
    if depth > MAX_WALK_DEPTH {
        return 0;
    }
    match value {
        Value::Array(items) => {
            1 + items
                .iter()
                .map(|child| count_arrays(child, depth + 1))
                .sum::<usize>()
        }
        Value::Object(map) => map
            .values()
            .map(|child| count_arrays(child, depth + 1))
            .sum(),
        _ => 0,
    }
}

fn nth_array_mut<'a>(
    value: &'a mut Value,
    target: &mut usize,
    depth: usize,
) -> Option<&'a mut Vec<Value>> {
    if depth > MAX_WALK_DEPTH {
        return None;
    }
    match value {
        Value::Array(items) => {
            if *target == 0 {
                return Some(items);
            }
            *target -= 1;
            for child in items.iter_mut() {
                if let Some(found) = nth_array_mut(child, target, depth + 1) {
                    return Some(found);
                }
            }
            None
        }
        Value::Object(map) => {
            for child in map.values_mut() {
                if let Some(found) = nth_array_mut(child, target, depth + 1) {
                    return Some(found);
                }
            }
            None
        }
        _ => None,
    }
}

fn count_strings(value: &Value, depth: usize) -> usize {
    if depth > MAX_WALK_DEPTH {
        return 0;
    }
    match value {
        Value::String(_) => 1,
        Value::Array(items) => items
            .iter()
            .map(|child| count_strings(child, depth + 1))
            .sum(),
        Value::Object(map) => map
            .values()
            .map(|child| count_strings(child, depth + 1))
            .sum(),
        _ => 0,
    }
}

fn nth_string_mut<'a>(
    value: &'a mut Value,
    target: &mut usize,
    depth: usize,
) -> Option<&'a mut String> {
    if depth > MAX_WALK_DEPTH {
        return None;
    }
    match value {
        Value::String(s) => {
            if *target == 0 {
                return Some(s);
            }
            *target -= 1;
            None
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                if let Some(found) = nth_string_mut(child, target, depth + 1) {
                    return Some(found);
                }
            }
            None
        }
        Value::Object(map) => {
            for child in map.values_mut() {
                if let Some(found) = nth_string_mut(child, target, depth + 1) {
                    return Some(found);
                }
            }
            None
        }
        _ => None,
    }
}

fn random_object_mut<'a>(
    root: &'a mut Value,
    rng: &mut dyn RngCore,
) -> Option<&'a mut Map<String, Value>> {
    let total = count_objects(root, 0);
    if total == 0 {
        return None;
    }
    let mut target = rng.random_range(0..total);
    nth_object_mut(root, &mut target, 0)
}

fn random_array_mut<'a>(root: &'a mut Value, rng: &mut dyn RngCore) -> Option<&'a mut Vec<Value>> {
    let total = count_arrays(root, 0);
    if total == 0 {
        return None;
    }
    let mut target = rng.random_range(0..total);
    nth_array_mut(root, &mut target, 0)
}

fn random_string_mut<'a>(root: &'a mut Value, rng: &mut dyn RngCore) -> Option<&'a mut String> {
    let total = count_strings(root, 0);
    if total == 0 {
        return None;
    }
    let mut target = rng.random_range(0..total);
    nth_string_mut(root, &mut target, 0)
}

/// Inserts `value` into a random object if one exists, else a random array,
/// else wraps the root in a two-element array.
fn place_value(root: &mut Value, value: Value, rng: &mut dyn RngCore) {
    if let Some(map) = random_object_mut(root, rng) {
        map.insert(random_key(rng), value);
    } else if let Some(items) = random_array_mut(root, rng) {
        let at = rng.random_range(0..=items.len());
        items.insert(at, value);
    } else {
        let previous = std::mem::take(root);
        *root = Value::Array(vec![previous, value]);
    }
}

fn rare_scalar(rng: &mut dyn RngCore) -> Value {
    match rng.random_range(0..8u32) {
        0 => json!(1e308),
        1 => json!(-1e308),
        2 => json!(5e-324),
        3 => json!(-0.0),
        4 => Value::String("\u{0}\u{1}\u{1f}".to_string()),
        5 => json!("9007199254740993"),
        6 => json!({"": null}),
        _ => json!([[]]),
    }
}

fn op_inject_rare(seed: &[u8], _aux: &[u8], _max_size: usize, rng: &mut dyn RngCore) -> Option<Vec<u8>> {
    let mut root = parse_json(seed)?;
    let scalar = rare_scalar(rng);
    place_value(&mut root, scalar, rng);
    to_bytes(&root)
}

fn truncate_on_char_boundary(s: &mut String, max_bytes: usize) {
    if s.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

fn op_long_string(seed: &[u8], _aux: &[u8], max_size: usize, rng: &mut dyn RngCore) -> Option<Vec<u8>> {
    let mut root = parse_json(seed)?;
    let budget = max_size.min(MAX_LONG_STRING);

    if let Some(s) = random_string_mut(&mut root, rng) {
        if s.is_empty() {
            s.push_str("aa");
        }
        let factor = rng
            .random_range(2..=8usize)
            .min((budget / s.len().max(1)).max(1));
        let mut grown = s.repeat(factor);
        truncate_on_char_boundary(&mut grown, budget);
        *s = grown;
    } else {
        let target_len = rng.random_range(64..=1024usize).min(budget.max(1));
        place_value(&mut root, Value::String("a".repeat(target_len)), rng);
    }
    to_bytes(&root)
}

fn op_deep_nest(seed: &[u8], _aux: &[u8], _max_size: usize, rng: &mut dyn RngCore) -> Option<Vec<u8>> {
    let root = parse_json(seed)?;
    let wraps = rng.random_range(8..=MAX_NEST_WRAP);

    let mut nested = root;
    for _ in 0..wraps {
        if rng.random_bool(0.25) {
            let mut map = Map::new();
            map.insert("d".to_string(), nested);
            nested = Value::Object(map);
        } else {
            nested = Value::Array(vec![nested]);
        }
    }
    to_bytes(&nested)
}

fn op_utf8_edge(seed: &[u8], _aux: &[u8], _max_size: usize, rng: &mut dyn RngCore) -> Option<Vec<u8>> {
    let mut root = parse_json(seed)?;
    let fragment = UTF8_EDGE_FRAGMENTS[rng.random_range(0..UTF8_EDGE_FRAGMENTS.len())];

    if let Some(s) = random_string_mut(&mut root, rng) {
        let boundaries: Vec<usize> = s.char_indices().map(|(at, _)| at).chain([s.len()]).collect();
        let at = boundaries[rng.random_range(0..boundaries.len())];
        s.insert_str(at, fragment);
    } else {
        place_value(&mut root, Value::String(fragment.to_string()), rng);
    }
    to_bytes(&root)
}

/// Re-emits the root object with one member lexically duplicated. The copy
/// goes first so the original occurrence still wins under last-wins parsers.
fn op_dup_key(seed: &[u8], _aux: &[u8], _max_size: usize, rng: &mut dyn RngCore) -> Option<Vec<u8>> {
    let root = parse_json(seed)?;
    let Value::Object(map) = &root else {
        return None;
    };
    if map.is_empty() {
        return None;
    }

    let pick = rng.random_range(0..map.len());
    let (key, value) = map.iter().nth(pick)?;
    let member_key = serde_json::to_vec(&Value::String(key.clone())).ok()?;
    let member_value = serde_json::to_vec(value).ok()?;
    let body = to_bytes(&root)?;

    let mut out = Vec::with_capacity(body.len() + member_key.len() + member_value.len() + 2);
    out.push(b'{');
    out.extend_from_slice(&member_key);
    out.push(b':');
    out.extend_from_slice(&member_value);
    out.push(b',');
    out.extend_from_slice(&body[1..]);
    Some(out)
}

fn op_add_field(seed: &[u8], _aux: &[u8], _max_size: usize, rng: &mut dyn RngCore) -> Option<Vec<u8>> {
    let mut root = parse_json(seed)?;
    let value = match rng.random_range(0..6u32) {
        0 => Value::Null,
        1 => json!(true),
        2 => json!(false),
        3 => Value::String(random_key(rng)),
        4 => json!(rng.random_range(-1000i64..=1000)),
        _ => json!([]),
    };
    let map = random_object_mut(&mut root, rng)?;
    map.insert(random_key(rng), value);
    to_bytes(&root)
}

fn op_del_field(seed: &[u8], _aux: &[u8], _max_size: usize, rng: &mut dyn RngCore) -> Option<Vec<u8>> {
    let mut root = parse_json(seed)?;
    let total = count_objects(&root, 0);
    if total == 0 {
        return None;
    }

    // A randomly chosen object may be empty; a few retries find a non-empty
    // one without needing a second kind of walker.
    for _ in 0..4 {
        let mut target = rng.random_range(0..total);
        if let Some(map) = nth_object_mut(&mut root, &mut target, 0) {
            if !map.is_empty() {
                let pick = rng.random_range(0..map.len());
                let key = map.keys().nth(pick).cloned()?;
                map.remove(&key);
                return to_bytes(&root);
            }
        }
    }
    None
}

fn op_splice_object(seed: &[u8], aux: &[u8], _max_size: usize, rng: &mut dyn RngCore) -> Option<Vec<u8>> {
    let mut root = parse_json(seed)?;
    let mut donor_root = parse_json(aux)?;

    let donor = random_object_mut(&mut donor_root, rng)?;
    if donor.is_empty() {
        return None;
    }
    let take = rng.random_range(1..=donor.len().min(MAX_SPLICE_MEMBERS));
    let start = rng.random_range(0..donor.len());
    let keys: Vec<&String> = donor.keys().collect();
    let mut members = Vec::with_capacity(take);
    for offset in 0..take {
        let key = keys[(start + offset) % keys.len()];
        if let Some(value) = donor.get(key) {
            members.push((key.clone(), value.clone()));
        }
    }

    let target = random_object_mut(&mut root, rng)?;
    for (key, value) in members {
        target.insert(key, value);
    }
    to_bytes(&root)
}

fn op_splice_array(seed: &[u8], aux: &[u8], _max_size: usize, rng: &mut dyn RngCore) -> Option<Vec<u8>> {
    let mut root = parse_json(seed)?;
    let mut donor_root = parse_json(aux)?;

    let donor = random_array_mut(&mut donor_root, rng)?;
    if donor.is_empty() {
        return None;
    }
    let take = rng.random_range(1..=donor.len().min(MAX_SPLICE_MEMBERS));
    let start = rng.random_range(0..=donor.len() - take);
    let run: Vec<Value> = donor[start..start + take].to_vec();

    let target = random_array_mut(&mut root, rng)?;
    let at = rng.random_range(0..=target.len());
    for (offset, value) in run.into_iter().enumerate() {
        target.insert(at + offset, value);
    }
    to_bytes(&root)
}
