use std::fmt;

/// Wire literal for the members partition.
pub const MEMBERS_TAG: &str = "grade";
/// Wire literal for the servants ("who serve") partition.
pub const SERVANTS_TAG: &str = "who";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Partition {
    Members,
    Servants,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Members, Partition::Servants];

    pub fn tag(self) -> &'static str {
        match self {
            Partition::Members => MEMBERS_TAG,
            Partition::Servants => SERVANTS_TAG,
        }
    }

    pub fn from_tag(tag: &str) -> Option<Partition> {
        match tag {
            MEMBERS_TAG => Some(Partition::Members),
            SERVANTS_TAG => Some(Partition::Servants),
            _ => None,
        }
    }

    /// Name used on the IPC surface.
    pub fn name(self) -> &'static str {
        match self {
            Partition::Members => "members",
            Partition::Servants => "servants",
        }
    }

    pub fn from_name(name: &str) -> Option<Partition> {
        match name.trim().to_ascii_lowercase().as_str() {
            "members" | "member" => Some(Partition::Members),
            "servants" | "servant" => Some(Partition::Servants),
            _ => None,
        }
    }
}

/// Selects one row list inside a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    Grade(u32),
    Category { category: u32, grade: u32 },
}

impl GroupKey {
    pub fn components(&self) -> Vec<u32> {
        match *self {
            GroupKey::Grade(g) => vec![g],
            GroupKey::Category { category, grade } => vec![category, grade],
        }
    }

    pub fn from_components(parts: &[u32]) -> Option<GroupKey> {
        match *parts {
            [grade] => Some(GroupKey::Grade(grade)),
            [category, grade] => Some(GroupKey::Category { category, grade }),
            _ => None,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Grade(g) => write!(f, "{g}"),
            GroupKey::Category { category, grade } => write!(f, "{category}/{grade}"),
        }
    }
}

/// Label sets defining which group keys a stage knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupLayout {
    Grades(Vec<&'static str>),
    Categories {
        categories: Vec<&'static str>,
        grades: Vec<&'static str>,
    },
}

impl GroupLayout {
    pub fn arity(&self) -> usize {
        match self {
            GroupLayout::Grades(_) => 1,
            GroupLayout::Categories { .. } => 2,
        }
    }

    pub fn contains(&self, key: &GroupKey) -> bool {
        match (self, key) {
            (GroupLayout::Grades(grades), GroupKey::Grade(g)) => (*g as usize) < grades.len(),
            (
                GroupLayout::Categories { categories, grades },
                GroupKey::Category { category, grade },
            ) => (*category as usize) < categories.len() && (*grade as usize) < grades.len(),
            _ => false,
        }
    }

    /// All keys in ascending order.
    pub fn keys(&self) -> Vec<GroupKey> {
        match self {
            GroupLayout::Grades(grades) => (0..grades.len() as u32).map(GroupKey::Grade).collect(),
            GroupLayout::Categories { categories, grades } => (0..categories.len() as u32)
                .flat_map(|category| {
                    (0..grades.len() as u32).map(move |grade| GroupKey::Category { category, grade })
                })
                .collect(),
        }
    }

    pub fn label(&self, key: &GroupKey) -> Option<String> {
        if !self.contains(key) {
            return None;
        }
        match (self, key) {
            (GroupLayout::Grades(grades), GroupKey::Grade(g)) => Some(grades[*g as usize].to_string()),
            (
                GroupLayout::Categories { categories, grades },
                GroupKey::Category { category, grade },
            ) => Some(format!(
                "{} / {}",
                categories[*category as usize], grades[*grade as usize]
            )),
            _ => None,
        }
    }

    /// Where a legacy single-grade row lands in this layout.
    pub fn legacy_key(&self, grade: u32) -> GroupKey {
        match self {
            GroupLayout::Grades(_) => GroupKey::Grade(grade),
            GroupLayout::Categories { .. } => GroupKey::Category { category: 0, grade },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: u32,
    pub name: String,
    pub attendance: Vec<bool>,
}
