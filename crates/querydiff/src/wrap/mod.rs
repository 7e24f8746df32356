pub const FIELD_NAMES: &[&str] = &[
    "aID", "bID", "cID", "dID", "eID", "fID", "gID", "hID", "iID", "jID", "kID", "lID",
];
pub const DEFAULT_EXPECTED_TABLES: usize = 5;
pub const DEFAULT_ROOT_MARKER: &str = "PRECEDING";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrapPolicy {
    Permissive,
    Strict {
        expected_tables: usize,
        marker: String,
    },
}

impl Default for WrapPolicy {
    fn default() -> Self {
        Self::Strict {
            expected_tables: DEFAULT_EXPECTED_TABLES,
            marker: DEFAULT_ROOT_MARKER.to_string(),
        }
    }
}

impl WrapPolicy {
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::Permissive => "permissive",
            Self::Strict { .. } => "strict",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrapResult {
    Wrapped(String),
    Skip,
}

impl WrapResult {
    #[must_use]
    pub fn into_query(self) -> Option<String> {
        match self {
            Self::Wrapped(query) => Some(query),
            Self::Skip => None,
        }
    }
}

/// Candidate identifier columns referenced by `input`, in [`FIELD_NAMES`] order.
///
/// A column counts when its name appears verbatim, or when its table appears
/// as a quoted one-letter identifier (`"a"` for `aID`).
#[must_use]
pub fn detect_fields(input: &str) -> Vec<&'static str> {
    FIELD_NAMES
        .iter()
        .copied()
        .filter(|field| input.contains(field) || input.contains(&quoted_table(field)))
        .collect()
}

fn quoted_table(field: &str) -> String {
    let table: String = field.chars().take(1).collect();
    format!("\"{table}\"")
}

#[must_use]
pub fn wrap_query(input: &str, policy: &WrapPolicy) -> WrapResult {
    let fields = detect_fields(input);

    if let WrapPolicy::Strict {
        expected_tables,
        marker,
    } = policy
    {
        if fields.len() != *expected_tables || !input.contains(marker.as_str()) {
            return WrapResult::Skip;
        }
    }

    let projection = fields
        .iter()
        .map(|field| format!("\"{field}\""))
        .collect::<Vec<_>>()
        .join(", ");
    WrapResult::Wrapped(format!("SELECT {projection} from ({input}) AS \"z\""))
}
