use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLimit {
    Count(u32),
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: PageLimit,
}

impl PageRequest {
    /// Page numbers below 1 are treated as the first page.
    pub fn new(page: i64, limit: PageLimit) -> Self {
        let page = page.clamp(1, i64::from(u32::MAX)) as u32;
        Self { page, limit }
    }

    /// SQLite `LIMIT` value; -1 means unbounded.
    pub fn sql_limit(&self) -> i64 {
        match self.limit {
            PageLimit::Count(n) => i64::from(n),
            PageLimit::All => -1,
        }
    }

    pub fn sql_offset(&self) -> i64 {
        match self.limit {
            PageLimit::Count(n) => i64::from(self.page - 1) * i64::from(n),
            PageLimit::All => 0,
        }
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        match self.limit {
            PageLimit::Count(0) => 0,
            PageLimit::Count(n) => total.div_ceil(u64::from(n)),
            PageLimit::All => u64::from(total > 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn parse(raw: Option<&str>, default: SortDir) -> Result<SortDir, ServiceError> {
        match raw.map(|s| s.trim().to_ascii_lowercase()) {
            None => Ok(default),
            Some(s) if s.is_empty() => Ok(default),
            Some(s) if s == "asc" => Ok(SortDir::Asc),
            Some(s) if s == "desc" => Ok(SortDir::Desc),
            Some(s) => Err(ServiceError::validation(format!(
                "sort order must be asc or desc, got {s:?}"
            ))),
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

/// A listing's recognised sort keys. Each maps to a fixed SQL expression, so sort input
/// never reaches the query text.
pub trait SortField: Sized + Copy + 'static {
    const FIELDS: &'static [(&'static str, Self)];

    fn column(self) -> &'static str;

    fn parse(raw: &str) -> Result<Self, ServiceError> {
        Self::FIELDS
            .iter()
            .find(|(name, _)| *name == raw.trim())
            .map(|(_, f)| *f)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::FIELDS.iter().map(|(n, _)| *n).collect();
                ServiceError::validation(format!(
                    "unknown sort field {raw:?}; expected one of {}",
                    known.join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort<F> {
    pub field: F,
    pub dir: SortDir,
}

impl<F: SortField> Sort<F> {
    pub fn order_by(&self) -> String {
        format!("{} {}", self.field.column(), self.dir.sql())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentSort {
    Name,
    Roll,
    CreatedAt,
}

impl SortField for StudentSort {
    const FIELDS: &'static [(&'static str, Self)] = &[
        ("name", StudentSort::Name),
        ("roll", StudentSort::Roll),
        ("createdAt", StudentSort::CreatedAt),
    ];

    fn column(self) -> &'static str {
        match self {
            StudentSort::Name => "s.name COLLATE NOCASE",
            StudentSort::Roll => "s.roll",
            StudentSort::CreatedAt => "s.created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeacherSort {
    Name,
    CreatedAt,
}

impl SortField for TeacherSort {
    const FIELDS: &'static [(&'static str, Self)] = &[
        ("name", TeacherSort::Name),
        ("createdAt", TeacherSort::CreatedAt),
    ];

    fn column(self) -> &'static str {
        match self {
            TeacherSort::Name => "t.name COLLATE NOCASE",
            TeacherSort::CreatedAt => "t.created_at",
        }
    }
}

/// Case-insensitive substring pattern for `LIKE ... ESCAPE '\'`.
pub fn like_pattern(search: &str) -> String {
    let mut out = String::with_capacity(search.len() + 2);
    out.push('%');
    for c in search.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}
