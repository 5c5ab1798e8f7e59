//! Ordered code sections and token substitution
//!
//! A stream writes into named sections; closing concatenates them in
//! [`Section::ORDER`] and replaces `__TOKEN__` sentinels through a
//! [`Substitutions`] map.

use std::collections::BTreeMap;

/// Named part of a generated module
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    Header,
    Camera,
    Background,
    Map,
    TerrainMap,
    Shadow,
    HitAndNormals,
    Ao,
    MaterialFunctions,
    Material,
}

impl Section {
    /// Concatenation order of a closed stream
    pub const ORDER: [Section; 10] = [
        Section::Header,
        Section::Camera,
        Section::Background,
        Section::Map,
        Section::TerrainMap,
        Section::Shadow,
        Section::HitAndNormals,
        Section::Ao,
        Section::MaterialFunctions,
        Section::Material,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Camera => "camera",
            Self::Background => "background",
            Self::Map => "map",
            Self::TerrainMap => "terrain_map",
            Self::Shadow => "shadow",
            Self::HitAndNormals => "hit_and_normals",
            Self::Ao => "ao",
            Self::MaterialFunctions => "material_functions",
            Self::Material => "material",
        }
    }

    fn index(self) -> usize {
        Self::ORDER.iter().position(|s| *s == self).unwrap_or(0)
    }
}

/// Code buffers, one per [`Section`]
#[derive(Debug, Clone, Default)]
pub struct CodeSections {
    buffers: [String; 10],
}

impl CodeSections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, section: Section, code: &str) {
        self.buffers[section.index()].push_str(code);
    }

    pub fn get(&self, section: Section) -> &str {
        &self.buffers[section.index()]
    }

    /// Swap a section's content, returning the previous text
    pub fn replace(&mut self, section: Section, code: String) -> String {
        std::mem::replace(&mut self.buffers[section.index()], code)
    }

    pub fn clear(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
    }

    /// All sections joined in order
    pub fn assemble(&self) -> String {
        let mut source = String::new();
        for section in Section::ORDER {
            let code = self.get(section);
            if !code.is_empty() {
                source.push_str(&format!("// {}\n", section.name()));
                source.push_str(code);
                source.push('\n');
            }
        }
        source
    }
}

/// Sentinel token replacements applied when a stream closes
#[derive(Debug, Clone, Default)]
pub struct Substitutions {
    map: BTreeMap<String, String>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sentinel spelling of a token name
    pub fn token(name: &str) -> String {
        format!("__{name}__")
    }

    /// Register a replacement for `__{name}__`
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.map.insert(Self::token(name), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(&Self::token(name))
    }

    pub fn apply(&self, source: &str) -> String {
        let mut out = source.to_string();
        for (token, value) in &self.map {
            if out.contains(token.as_str()) {
                out = out.replace(token.as_str(), value);
            }
        }
        out
    }
}

/// Sentinels still present in a source text
pub fn unresolved_tokens(source: &str) -> Vec<String> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'_' && bytes[i + 1] == b'_' {
            let start = i + 2;
            let mut end = start;
            while end < bytes.len() && is_token_byte(bytes[end]) {
                end += 1;
            }
            let name = source[start..end].strip_suffix("__").unwrap_or("");
            if name.bytes().next().is_some_and(|b| b.is_ascii_uppercase()) {
                let token = format!("__{name}__");
                if !tokens.contains(&token) {
                    tokens.push(token);
                }
                i = end;
                continue;
            }
            i = start;
        } else {
            i += 1;
        }
    }
    tokens
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_'
}
