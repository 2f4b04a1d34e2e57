//! C header emission.
//!
//! Generated headers share one shape: a banner comment, an include guard, a run of
//! `#define` lines and the closing `#endif`.

use std::fmt::Write as _;

/// Builds the text of a generated C header.
pub struct HeaderWriter {
    guard: String,
    banner: Vec<String>,
    defines: Vec<(String, String)>,
}

impl HeaderWriter {
    pub fn new(guard: &str) -> Self {
        Self {
            guard: guard.to_string(),
            banner: vec!["THIS FILE IS AUTO GENERATED.  PLEASE DO NOT EDIT.".to_string()],
            defines: Vec::new(),
        }
    }

    /// Appends a paragraph to the banner comment.
    pub fn describe(mut self, text: &str) -> Self {
        self.banner.push(String::new());
        self.banner.extend(text.lines().map(str::to_string));
        self
    }

    /// Adds `#define name value` with the value in lower-case hex.
    pub fn define_hex(&mut self, name: &str, value: u64) {
        self.defines.push((name.to_string(), format!("0x{value:x}")));
    }

    /// Adds `#define name value` with the value in decimal.
    pub fn define(&mut self, name: &str, value: u64) {
        self.defines.push((name.to_string(), value.to_string()));
    }

    pub fn len(&self) -> usize {
        self.defines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }

    pub fn finish(&self) -> String {
        let mut out = String::new();
        for (i, line) in self.banner.iter().enumerate() {
            let lead = if i == 0 { "/*" } else { " *" };
            if line.is_empty() {
                out.push_str(lead);
            } else {
                let _ = write!(out, "{lead} {line}");
            }
            out.push('\n');
        }
        out.push_str(" */\n\n");
        let _ = writeln!(out, "#ifndef {}", self.guard);
        let _ = writeln!(out, "#define {}", self.guard);
        out.push('\n');
        for (name, value) in &self.defines {
            let _ = writeln!(out, "#define {name} {value}");
        }
        if !self.defines.is_empty() {
            out.push('\n');
        }
        let _ = writeln!(out, "#endif /* {} */", self.guard);
        out
    }
}
