use crate::model::GroupLayout;

/// One instance of the attendance module. Stages share all logic and differ
/// only in group layout and collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Elementary,
    Preparatory,
    Secondary,
}

const BOYS_GIRLS: [&str; 2] = ["Boys", "Girls"];

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Elementary, Stage::Preparatory, Stage::Secondary];

    pub fn parse(s: &str) -> Option<Stage> {
        let wanted = s.trim().to_ascii_lowercase();
        Stage::ALL.into_iter().find(|stage| stage.name() == wanted)
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Elementary => "elementary",
            Stage::Preparatory => "preparatory",
            Stage::Secondary => "secondary",
        }
    }

    pub fn collection(self) -> &'static str {
        match self {
            Stage::Elementary => "attendance_elementary",
            Stage::Preparatory => "attendance_preparatory",
            Stage::Secondary => "attendance_secondary",
        }
    }

    pub fn layout(self) -> GroupLayout {
        match self {
            Stage::Elementary => GroupLayout::Grades(vec![
                "Grade 1", "Grade 2", "Grade 3", "Grade 4", "Grade 5", "Grade 6",
            ]),
            Stage::Preparatory => GroupLayout::Categories {
                categories: BOYS_GIRLS.to_vec(),
                grades: vec!["Grade 7", "Grade 8", "Grade 9"],
            },
            Stage::Secondary => GroupLayout::Categories {
                categories: BOYS_GIRLS.to_vec(),
                grades: vec!["Grade 10", "Grade 11", "Grade 12"],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collections_are_distinct() {
        let mut names: Vec<&str> = Stage::ALL.iter().map(|s| s.collection()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Stage::parse(" Secondary"), Some(Stage::Secondary));
        assert_eq!(Stage::parse("college"), None);
        for s in Stage::ALL {
            assert_eq!(Stage::parse(s.name()), Some(s));
        }
    }
}
