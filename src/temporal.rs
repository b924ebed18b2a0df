//! Temporal lifecycle tracking and period bucketing.
//!
//! Insights are bucketed into calendar periods by a period key (`"Qn YYYY"`,
//! `"YYYY"`, `"YYYY-MM"`) derived purely from month/year arithmetic, and
//! keys parse back into their calendar bounds. State classification
//! (new / reiterated / modified) is assigned at insight-creation time by the
//! analysis pipeline, not recomputed here.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::dedup::word_jaccard;
use crate::models::{Category, Initiative, Insight};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodGranularity {
    Month,
    Quarter,
    Year,
}

impl PeriodGranularity {
    pub fn parse(s: &str) -> Option<PeriodGranularity> {
        match s {
            "month" => Some(PeriodGranularity::Month),
            "quarter" => Some(PeriodGranularity::Quarter),
            "year" => Some(PeriodGranularity::Year),
            _ => None,
        }
    }
}

/// Period key for a date: `"Q2 2024"`, `"2024"`, or `"2024-05"`.
pub fn period_key(date: DateTime<Utc>, granularity: PeriodGranularity) -> String {
    match granularity {
        PeriodGranularity::Quarter => {
            let quarter = (date.month() - 1) / 3 + 1;
            format!("Q{} {}", quarter, date.year())
        }
        PeriodGranularity::Year => format!("{}", date.year()),
        PeriodGranularity::Month => format!("{}-{:02}", date.year(), date.month()),
    }
}

/// Parse a period key back into its inclusive calendar bounds.
pub fn period_bounds(
    key: &str,
    granularity: PeriodGranularity,
) -> Option<(NaiveDate, NaiveDate)> {
    match granularity {
        PeriodGranularity::Quarter => {
            let (q_part, year_part) = key.split_once(' ')?;
            let quarter: u32 = q_part.strip_prefix('Q')?.parse().ok()?;
            if !(1..=4).contains(&quarter) {
                return None;
            }
            let year: i32 = year_part.parse().ok()?;
            let start_month = (quarter - 1) * 3 + 1;
            let start = NaiveDate::from_ymd_opt(year, start_month, 1)?;
            let end = next_month_start(year, start_month + 2)?.pred_opt()?;
            Some((start, end))
        }
        PeriodGranularity::Year => {
            let year: i32 = key.parse().ok()?;
            Some((
                NaiveDate::from_ymd_opt(year, 1, 1)?,
                NaiveDate::from_ymd_opt(year, 12, 31)?,
            ))
        }
        PeriodGranularity::Month => {
            let (year_part, month_part) = key.split_once('-')?;
            let year: i32 = year_part.parse().ok()?;
            let month: u32 = month_part.parse().ok()?;
            let start = NaiveDate::from_ymd_opt(year, month, 1)?;
            let end = next_month_start(year, month)?.pred_opt()?;
            Some((start, end))
        }
    }
}

fn next_month_start(year: i32, month: u32) -> Option<NaiveDate> {
    if month >= 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
}

/// One period bucket of the timeline.
#[derive(Debug, Clone)]
pub struct TimelinePeriod {
    pub period: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub insights: Vec<Insight>,
    pub new_count: usize,
    pub reiterated_count: usize,
    pub modified_count: usize,
}

/// Bucket insights into calendar periods, earliest first.
pub fn build_timeline(insights: &[Insight], granularity: PeriodGranularity) -> Vec<TimelinePeriod> {
    let mut grouped: BTreeMap<NaiveDate, (String, Vec<Insight>)> = BTreeMap::new();

    for insight in insights {
        let key = period_key(insight.created_at, granularity);
        let Some((start, _)) = period_bounds(&key, granularity) else {
            continue;
        };
        grouped
            .entry(start)
            .or_insert_with(|| (key, Vec::new()))
            .1
            .push(insight.clone());
    }

    grouped
        .into_iter()
        .map(|(start, (key, insights))| {
            let (_, end) = period_bounds(&key, granularity).expect("key built above");
            let new_count = insights.iter().filter(|i| i.is_new).count();
            let reiterated_count = insights.iter().filter(|i| i.is_reiterated).count();
            let modified_count = insights.iter().filter(|i| i.is_modified).count();
            TimelinePeriod {
                period: key,
                period_start: start,
                period_end: end,
                insights,
                new_count,
                reiterated_count,
                modified_count,
            }
        })
        .collect()
}

/// Aggregated trend view of a company's insights and initiatives.
#[derive(Debug, Clone)]
pub struct Trends {
    /// Insight count per category.
    pub category_distribution: Vec<(Category, usize)>,
    /// New insights per quarter, earliest first.
    pub new_by_period: Vec<(String, usize)>,
    /// Reiterated insights per quarter, earliest first.
    pub reiterated_by_period: Vec<(String, usize)>,
    /// Initiatives ranked by mention count, most discussed first.
    pub most_discussed: Vec<Initiative>,
}

pub fn build_trends(insights: &[Insight], initiatives: &[Initiative], top: usize) -> Trends {
    let mut by_category: BTreeMap<&'static str, (Category, usize)> = BTreeMap::new();
    for insight in insights {
        by_category
            .entry(insight.category.as_str())
            .or_insert((insight.category, 0))
            .1 += 1;
    }

    let mut new_by_period: BTreeMap<NaiveDate, (String, usize)> = BTreeMap::new();
    let mut reiterated_by_period: BTreeMap<NaiveDate, (String, usize)> = BTreeMap::new();
    for insight in insights {
        let key = period_key(insight.created_at, PeriodGranularity::Quarter);
        let Some((start, _)) = period_bounds(&key, PeriodGranularity::Quarter) else {
            continue;
        };
        if insight.is_new {
            new_by_period
                .entry(start)
                .or_insert_with(|| (key.clone(), 0))
                .1 += 1;
        }
        if insight.is_reiterated {
            reiterated_by_period
                .entry(start)
                .or_insert_with(|| (key.clone(), 0))
                .1 += 1;
        }
    }

    let mut ranked: Vec<Initiative> = initiatives.to_vec();
    ranked.sort_by(|a, b| b.mention_count.cmp(&a.mention_count));
    ranked.truncate(top);

    Trends {
        category_distribution: by_category.into_values().collect(),
        new_by_period: new_by_period.into_values().collect(),
        reiterated_by_period: reiterated_by_period.into_values().collect(),
        most_discussed: ranked,
    }
}

/// Whether a matched re-occurrence's description diverges enough from the
/// canonical description to count as modified rather than merely
/// reiterated. The threshold is a product decision surfaced in config
/// (`analysis.modified_threshold`), not an inferred constant.
pub fn is_modified(new_description: &str, canonical_description: &str, threshold: f64) -> bool {
    word_jaccard(new_description, canonical_description) < threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConfidenceLevel;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn insight(created: DateTime<Utc>, is_new: bool, modified: bool) -> Insight {
        Insight {
            id: "i".to_string(),
            company_id: "co1".to_string(),
            analysis_id: "a".to_string(),
            initiative_id: None,
            title: "t".to_string(),
            description: "d".to_string(),
            category: Category::Strategy,
            confidence_score: 0.5,
            confidence_level: ConfidenceLevel::Medium,
            is_new,
            is_reiterated: !is_new,
            is_modified: modified,
            created_at: created,
        }
    }

    #[test]
    fn period_keys() {
        assert_eq!(period_key(date(2024, 5, 15), PeriodGranularity::Quarter), "Q2 2024");
        assert_eq!(period_key(date(2024, 1, 1), PeriodGranularity::Quarter), "Q1 2024");
        assert_eq!(period_key(date(2024, 12, 31), PeriodGranularity::Quarter), "Q4 2024");
        assert_eq!(period_key(date(2024, 5, 15), PeriodGranularity::Year), "2024");
        assert_eq!(period_key(date(2024, 5, 15), PeriodGranularity::Month), "2024-05");
    }

    #[test]
    fn quarter_key_round_trips_to_bounds() {
        let (start, end) = period_bounds("Q2 2024", PeriodGranularity::Quarter).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 6, 30).unwrap());

        let (start, end) = period_bounds("Q4 2023", PeriodGranularity::Quarter).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2023, 10, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
    }

    #[test]
    fn month_and_year_bounds() {
        let (start, end) = period_bounds("2024-02", PeriodGranularity::Month).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        let (start, end) = period_bounds("2024", PeriodGranularity::Year).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
    }

    #[test]
    fn invalid_keys_rejected() {
        assert!(period_bounds("Q5 2024", PeriodGranularity::Quarter).is_none());
        assert!(period_bounds("2024-13", PeriodGranularity::Month).is_none());
        assert!(period_bounds("garbage", PeriodGranularity::Quarter).is_none());
    }

    #[test]
    fn timeline_buckets_and_counts() {
        let insights = vec![
            insight(date(2024, 2, 1), true, false),
            insight(date(2024, 5, 1), false, false),
            insight(date(2024, 5, 20), false, true),
            insight(date(2023, 11, 5), true, false),
        ];
        let timeline = build_timeline(&insights, PeriodGranularity::Quarter);
        assert_eq!(timeline.len(), 3);
        // Ordered by period start across year boundaries.
        assert_eq!(timeline[0].period, "Q4 2023");
        assert_eq!(timeline[1].period, "Q1 2024");
        assert_eq!(timeline[2].period, "Q2 2024");

        let q2 = &timeline[2];
        assert_eq!(q2.insights.len(), 2);
        assert_eq!(q2.new_count, 0);
        assert_eq!(q2.reiterated_count, 2);
        assert_eq!(q2.modified_count, 1);
    }

    #[test]
    fn trends_rank_most_discussed() {
        fn initiative(name: &str, mentions: i64) -> Initiative {
            let now = date(2024, 1, 1);
            Initiative {
                id: name.to_string(),
                company_id: "co1".to_string(),
                name: name.to_string(),
                description: String::new(),
                category: Category::Strategy,
                first_mentioned_at: now,
                last_mentioned_at: now,
                first_document_id: "d1".to_string(),
                mention_count: mentions,
                document_count: 1,
                avg_confidence: 0.5,
                is_active: true,
                is_completed: false,
                keywords: Vec::new(),
                created_at: now,
                updated_at: now,
            }
        }

        let initiatives = vec![
            initiative("rare", 1),
            initiative("hot", 9),
            initiative("warm", 4),
        ];
        let insights = vec![
            insight(date(2024, 2, 1), true, false),
            insight(date(2024, 5, 1), false, false),
        ];
        let trends = build_trends(&insights, &initiatives, 2);
        let names: Vec<&str> = trends.most_discussed.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["hot", "warm"]);
        assert_eq!(trends.new_by_period, vec![("Q1 2024".to_string(), 1)]);
        assert_eq!(trends.reiterated_by_period, vec![("Q2 2024".to_string(), 1)]);
    }

    #[test]
    fn modified_when_descriptions_diverge() {
        assert!(!is_modified(
            "expand the cloud platform into europe",
            "expand the cloud platform into europe",
            0.4
        ));
        assert!(is_modified(
            "an entirely different initiative now",
            "expand the cloud platform into europe",
            0.4
        ));
    }
}
