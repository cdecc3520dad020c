//! Fleet-wide figures computed from the registry and the care log.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::models::{Activity, CareLogEntry, Health, Tree};

/// Watering sessions expected per tree within the reporting window.
pub const EXPECTED_WATERINGS_PER_TREE: usize = 4;

pub const RECENT_PLANTING_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthCounts {
    pub healthy: usize,
    pub needs_care: usize,
    pub critical: usize,
}

impl HealthCounts {
    fn add(&mut self, health: Health) {
        match health {
            Health::Healthy => self.healthy += 1,
            Health::NeedsCare => self.needs_care += 1,
            Health::Critical => self.critical += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.healthy + self.needs_care + self.critical
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetSummary {
    pub total_trees: usize,
    pub health: HealthCounts,
    /// `None` with no trees.
    pub average_survival: Option<f64>,
    pub needing_attention: usize,
    pub planted_recently: usize,
    pub caretakers: usize,
    pub total_activities: usize,
    pub activities: BTreeMap<Activity, usize>,
    pub watering_sessions: usize,
    /// Percentage, may exceed 100 when trees are watered more than expected.
    pub maintenance_rate: f64,
    pub disease_treatments: usize,
    pub inspections: usize,
    pub species_health: BTreeMap<String, HealthCounts>,
}

pub fn summarize(trees: &[Tree], logs: &[CareLogEntry], today: NaiveDate) -> FleetSummary {
    let mut health = HealthCounts::default();
    let mut species_health: BTreeMap<String, HealthCounts> = BTreeMap::new();
    let mut caretakers = BTreeSet::new();
    let mut planted_recently = 0;
    let mut survival_sum = 0u64;

    for tree in trees {
        health.add(tree.health);
        species_health
            .entry(tree.species.clone())
            .or_default()
            .add(tree.health);
        caretakers.insert(tree.caretaker.as_str());
        survival_sum += u64::from(tree.survival_probability);

        let age_days = (today - tree.planted_date).num_days();
        if (0..=RECENT_PLANTING_DAYS).contains(&age_days) {
            planted_recently += 1;
        }
    }

    let mut activities: BTreeMap<Activity, usize> = BTreeMap::new();
    for log in logs {
        *activities.entry(log.activity).or_default() += 1;
    }
    let count = |activity: Activity| activities.get(&activity).copied().unwrap_or(0);
    let watering_sessions = count(Activity::Watering);

    let average_survival =
        (!trees.is_empty()).then(|| survival_sum as f64 / trees.len() as f64);
    let maintenance_rate = if trees.is_empty() {
        0.0
    } else {
        watering_sessions as f64 / (trees.len() * EXPECTED_WATERINGS_PER_TREE) as f64 * 100.0
    };

    FleetSummary {
        total_trees: trees.len(),
        needing_attention: health.needs_care + health.critical,
        health,
        average_survival,
        planted_recently,
        caretakers: caretakers.len(),
        total_activities: logs.len(),
        watering_sessions,
        maintenance_rate,
        disease_treatments: count(Activity::DiseaseTreatment),
        inspections: count(Activity::Inspection),
        activities,
        species_health,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn tree(species: &str, caretaker: &str, planted: NaiveDate, health: Health, survival: u8) -> Tree {
        let mut tree = Tree::new(
            format!("T-{species}"),
            species.to_string(),
            planted,
            "Park".to_string(),
            caretaker.to_string(),
        );
        tree.health = health;
        tree.survival_probability = survival;
        tree
    }

    fn log(activity: Activity) -> CareLogEntry {
        CareLogEntry::new("T-1".into(), activity, "Ana".into(), date(2024, 6, 1))
    }

    #[test]
    fn empty_fleet_has_no_average_and_zero_rate() {
        let summary = summarize(&[], &[], date(2024, 6, 1));
        assert_eq!(summary.total_trees, 0);
        assert_eq!(summary.average_survival, None);
        assert_eq!(summary.maintenance_rate, 0.0);
    }

    #[test]
    fn counts_health_caretakers_and_recent_plantings() {
        let today = date(2024, 6, 30);
        let trees = vec![
            tree("Oak", "Ana", date(2024, 6, 10), Health::Healthy, 90),
            tree("Oak", "Luis", date(2023, 1, 1), Health::Critical, 40),
            tree("Elm", "Ana", date(2024, 5, 31), Health::NeedsCare, 80),
        ];

        let summary = summarize(&trees, &[], today);

        assert_eq!(summary.health.total(), 3);
        assert_eq!(summary.needing_attention, 2);
        assert_eq!(summary.caretakers, 2);
        assert_eq!(summary.planted_recently, 2);
        assert_eq!(summary.average_survival, Some(70.0));
        assert_eq!(
            summary.species_health["Oak"],
            HealthCounts {
                healthy: 1,
                needs_care: 0,
                critical: 1
            }
        );
    }

    #[test]
    fn maintenance_rate_assumes_four_waterings_per_tree() {
        let today = date(2024, 6, 30);
        let trees = vec![
            tree("Oak", "Ana", today, Health::Healthy, 95),
            tree("Elm", "Ana", today, Health::Healthy, 95),
        ];
        let logs = vec![
            log(Activity::Watering),
            log(Activity::Watering),
            log(Activity::DiseaseTreatment),
            log(Activity::Inspection),
            log(Activity::Inspection),
        ];

        let summary = summarize(&trees, &logs, today);

        assert_eq!(summary.watering_sessions, 2);
        assert_eq!(summary.maintenance_rate, 25.0);
        assert_eq!(summary.disease_treatments, 1);
        assert_eq!(summary.inspections, 2);
        assert_eq!(summary.total_activities, 5);
        assert_eq!(summary.activities.get(&Activity::Pruning), None);
    }
}
