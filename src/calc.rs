use crate::model::{AttendanceRecord, AttendanceStatus, ExamType, FeeRecord, MarkRecord, Subject};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Half-away-from-zero rounding to 2 decimals, used for every reported figure.
pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Grade-point bands on inclusive lower bounds. Everything under 50 maps to 4;
/// there is no 5.
pub fn grade_point(percentage: f64) -> u8 {
    if percentage >= 90.0 {
        10
    } else if percentage >= 80.0 {
        9
    } else if percentage >= 70.0 {
        8
    } else if percentage >= 60.0 {
        7
    } else if percentage >= 50.0 {
        6
    } else {
        4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    PublishedOnly,
    All,
}

impl Visibility {
    fn admits(&self, published: bool) -> bool {
        match self {
            Visibility::PublishedOnly => published,
            Visibility::All => true,
        }
    }
}

/// A mark joined with its subject. Subject fields are `None` when the join
/// found nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkRow {
    pub subject_id: String,
    pub subject_code: Option<String>,
    pub subject_name: Option<String>,
    pub credits: Option<f64>,
    pub semester: Option<i64>,
    pub exam_type: ExamType,
    pub marks_obtained: Option<f64>,
    pub max_marks: Option<f64>,
    pub published: bool,
}

impl MarkRow {
    /// `None` when the mark has no subject reference or an exam type outside
    /// the fixed set.
    pub fn join(mark: &MarkRecord, subjects: &HashMap<String, Subject>) -> Option<MarkRow> {
        let subject_id = mark.subject_id.clone()?;
        let exam_type = match mark.exam_type.parse::<ExamType>() {
            Ok(t) => t,
            Err(_) => {
                log::warn!(
                    "mark {} has unknown exam type {:?}; skipped",
                    mark.id,
                    mark.exam_type
                );
                return None;
            }
        };
        let subject = subjects.get(&subject_id);
        Some(MarkRow {
            subject_code: subject.map(|s| s.code.clone()),
            subject_name: subject.map(|s| s.name.clone()),
            credits: subject.and_then(|s| s.credits),
            semester: subject.and_then(|s| s.semester),
            subject_id,
            exam_type,
            marks_obtained: mark.marks_obtained,
            max_marks: mark.max_marks,
            published: mark.published,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Component {
    pub obtained: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectAggregate {
    pub subject_id: String,
    pub subject_code: Option<String>,
    pub subject_name: Option<String>,
    pub credits: Option<f64>,
    pub semester: Option<i64>,
    pub total_obtained: f64,
    pub total_max: f64,
    pub percentage: f64,
    /// `None` when nothing was gradable (`total_max` is zero).
    pub grade_point: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<BTreeMap<ExamType, Component>>,
}

impl SubjectAggregate {
    fn weight(&self) -> Option<f64> {
        let credits = self.credits.filter(|c| *c > 0.0)?;
        if self.total_max > 0.0 {
            Some(credits)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CgpaSummary {
    pub cgpa: f64,
    pub total_subjects: usize,
    pub subjects: Vec<SubjectAggregate>,
    pub overall_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemesterBlock {
    pub semester: i64,
    pub subjects: Vec<SubjectAggregate>,
    pub total_obtained: f64,
    pub total_max: f64,
    pub percentage: f64,
    pub sgpa: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemesterSummary {
    pub summary: Vec<SemesterBlock>,
    pub current_semester: Option<i64>,
}

#[derive(Default)]
struct SubjectAcc {
    row: Option<MarkRow>,
    obtained: f64,
    max: f64,
    components: BTreeMap<ExamType, Component>,
}

fn percentage_of(obtained: f64, max: f64) -> f64 {
    if max > 0.0 {
        obtained / max * 100.0
    } else {
        0.0
    }
}

fn compare_subjects(a: &SubjectAggregate, b: &SubjectAggregate) -> Ordering {
    let sem = |s: &SubjectAggregate| s.semester.unwrap_or(i64::MAX);
    sem(a)
        .cmp(&sem(b))
        .then_with(|| match (&a.subject_code, &b.subject_code) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.subject_id.cmp(&b.subject_id))
}

/// Per-subject aggregates with the per-exam-type components retained.
///
/// Components that were never recorded add nothing to either total. Rows
/// lacking `marks_obtained` or a positive `max_marks` are ignored.
pub fn subject_breakdown(rows: &[MarkRow], visibility: Visibility) -> Vec<SubjectAggregate> {
    let mut by_subject: HashMap<&str, SubjectAcc> = HashMap::new();
    for row in rows {
        if !visibility.admits(row.published) {
            continue;
        }
        let acc = by_subject.entry(row.subject_id.as_str()).or_default();
        if acc.row.is_none() {
            acc.row = Some(row.clone());
        }
        let (Some(obtained), Some(max)) = (row.marks_obtained, row.max_marks) else {
            log::debug!(
                "mark for subject {} ({}) has no score/max; ignored",
                row.subject_id,
                row.exam_type
            );
            continue;
        };
        if max <= 0.0 || obtained < 0.0 {
            continue;
        }
        acc.obtained += obtained;
        acc.max += max;
        let c = acc.components.entry(row.exam_type).or_insert(Component {
            obtained: 0.0,
            max: 0.0,
        });
        c.obtained += obtained;
        c.max += max;
    }

    let mut out: Vec<SubjectAggregate> = by_subject
        .into_values()
        .filter_map(|acc| {
            let row = acc.row?;
            let pct = percentage_of(acc.obtained, acc.max);
            Some(SubjectAggregate {
                subject_id: row.subject_id,
                subject_code: row.subject_code,
                subject_name: row.subject_name,
                credits: row.credits,
                semester: row.semester,
                total_obtained: acc.obtained,
                total_max: acc.max,
                percentage: round_2(pct),
                grade_point: if acc.max > 0.0 {
                    Some(grade_point(pct))
                } else {
                    None
                },
                components: Some(acc.components),
            })
        })
        .collect();
    out.sort_by(compare_subjects);
    out
}

/// Credit-weighted grade-point average over subjects that have both a
/// positive maximum and positive credits. Zero when none qualify.
pub fn cgpa(subjects: &[SubjectAggregate]) -> f64 {
    let mut weighted = 0.0;
    let mut credits = 0.0;
    for s in subjects {
        let Some(w) = s.weight() else {
            continue;
        };
        let gp = grade_point(percentage_of(s.total_obtained, s.total_max));
        weighted += f64::from(gp) * w;
        credits += w;
    }
    if credits > 0.0 {
        round_2(weighted / credits)
    } else {
        0.0
    }
}

fn without_components(mut subjects: Vec<SubjectAggregate>) -> Vec<SubjectAggregate> {
    for s in &mut subjects {
        s.components = None;
    }
    subjects
}

pub fn cgpa_summary(rows: &[MarkRow], visibility: Visibility) -> CgpaSummary {
    let subjects = without_components(subject_breakdown(rows, visibility));
    let obtained: f64 = subjects.iter().map(|s| s.total_obtained).sum();
    let max: f64 = subjects.iter().map(|s| s.total_max).sum();
    CgpaSummary {
        cgpa: cgpa(&subjects),
        total_subjects: subjects.len(),
        overall_percentage: round_2(percentage_of(obtained, max)),
        subjects,
    }
}

/// Subjects without a known semester are left out of the partition.
pub fn semester_summary(
    rows: &[MarkRow],
    visibility: Visibility,
    current_semester: Option<i64>,
) -> SemesterSummary {
    let mut by_semester: BTreeMap<i64, Vec<SubjectAggregate>> = BTreeMap::new();
    for s in without_components(subject_breakdown(rows, visibility)) {
        match s.semester {
            Some(sem) => by_semester.entry(sem).or_default().push(s),
            None => log::warn!(
                "subject {} has no semester; left out of semester summary",
                s.subject_id
            ),
        }
    }
    let summary = by_semester
        .into_iter()
        .map(|(semester, subjects)| {
            let total_obtained: f64 = subjects.iter().map(|s| s.total_obtained).sum();
            let total_max: f64 = subjects.iter().map(|s| s.total_max).sum();
            SemesterBlock {
                semester,
                sgpa: cgpa(&subjects),
                percentage: round_2(percentage_of(total_obtained, total_max)),
                total_obtained,
                total_max,
                subjects,
            }
        })
        .collect();
    SemesterSummary {
        summary,
        current_semester,
    }
}

/// An attendance record joined with its subject.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRow {
    pub subject_id: String,
    pub subject_code: Option<String>,
    pub subject_name: Option<String>,
    pub status: String,
}

impl AttendanceRow {
    pub fn join(rec: &AttendanceRecord, subjects: &HashMap<String, Subject>) -> Option<Self> {
        let subject_id = rec.subject_id.clone()?;
        let subject = subjects.get(&subject_id);
        Some(AttendanceRow {
            subject_code: subject.map(|s| s.code.clone()),
            subject_name: subject.map(|s| s.name.clone()),
            subject_id,
            status: rec.status.clone(),
        })
    }

    fn is_present(&self) -> bool {
        self.status.parse::<AttendanceStatus>() == Ok(AttendanceStatus::Present)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectAttendance {
    pub subject_id: String,
    pub subject_code: Option<String>,
    pub subject_name: Option<String>,
    pub total_classes: u32,
    pub present: u32,
    pub attendance_percentage: u32,
}

pub fn attendance_percentage(present: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (f64::from(present) / f64::from(total) * 100.0).round() as u32
}

/// Only `present` counts toward the numerator; late and excused do not.
pub fn attendance_summary(rows: &[AttendanceRow]) -> Vec<SubjectAttendance> {
    let mut by_subject: BTreeMap<&str, (&AttendanceRow, u32, u32)> = BTreeMap::new();
    for row in rows {
        let entry = by_subject
            .entry(row.subject_id.as_str())
            .or_insert((row, 0, 0));
        entry.1 += 1;
        if row.is_present() {
            entry.2 += 1;
        }
    }
    let mut out: Vec<SubjectAttendance> = by_subject
        .into_values()
        .map(|(row, total, present)| SubjectAttendance {
            subject_id: row.subject_id.clone(),
            subject_code: row.subject_code.clone(),
            subject_name: row.subject_name.clone(),
            total_classes: total,
            present,
            attendance_percentage: attendance_percentage(present, total),
        })
        .collect();
    out.sort_by(|a, b| {
        match (&a.subject_code, &b.subject_code) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| a.subject_id.cmp(&b.subject_id))
    });
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeStatus {
    Paid,
    Pending,
    Partial,
}

pub fn fee_status(amount_due: f64, amount_paid: f64) -> FeeStatus {
    if amount_due <= 0.0 {
        FeeStatus::Paid
    } else if amount_paid <= 0.0 {
        FeeStatus::Pending
    } else {
        FeeStatus::Partial
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeeView {
    #[serde(flatten)]
    pub record: FeeRecord,
    pub total_fee: f64,
    pub amount_due: f64,
    pub status: FeeStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeTotals {
    pub total_fees: f64,
    pub total_paid: f64,
    pub total_due: f64,
    pub overall_status: FeeStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeeSummary {
    pub fees: Vec<FeeView>,
    pub summary: FeeTotals,
}

pub fn fee_view(record: &FeeRecord) -> FeeView {
    let total_fee = round_2(record.tuition_fee + record.lab_fee + record.other_fee);
    let amount_due = round_2((total_fee - record.amount_paid).max(0.0));
    FeeView {
        record: record.clone(),
        total_fee,
        amount_due,
        status: fee_status(amount_due, record.amount_paid),
    }
}

/// Overpayment on one semester does not offset dues on another.
pub fn fee_summary(records: &[FeeRecord]) -> FeeSummary {
    let mut fees: Vec<FeeView> = records.iter().map(fee_view).collect();
    fees.sort_by_key(|f| f.record.semester);
    let total_fees = round_2(fees.iter().map(|f| f.total_fee).sum());
    let total_paid = round_2(fees.iter().map(|f| f.record.amount_paid).sum());
    let total_due = round_2(fees.iter().map(|f| f.amount_due).sum());
    FeeSummary {
        summary: FeeTotals {
            total_fees,
            total_paid,
            total_due,
            overall_status: fee_status(total_due, total_paid),
        },
        fees,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(
        subject: &str,
        credits: Option<f64>,
        semester: Option<i64>,
        exam_type: ExamType,
        obtained: f64,
        max: f64,
    ) -> MarkRow {
        MarkRow {
            subject_id: subject.to_string(),
            subject_code: Some(subject.to_uppercase()),
            subject_name: Some(format!("Subject {}", subject)),
            credits,
            semester,
            exam_type,
            marks_obtained: Some(obtained),
            max_marks: Some(max),
            published: true,
        }
    }

    fn present(subject: &str, status: &str) -> AttendanceRow {
        AttendanceRow {
            subject_id: subject.to_string(),
            subject_code: Some(subject.to_uppercase()),
            subject_name: None,
            status: status.to_string(),
        }
    }

    fn fee(tuition: f64, lab: f64, other: f64, paid: f64) -> FeeRecord {
        FeeRecord {
            id: "f1".into(),
            student_id: "s1".into(),
            semester: 1,
            tuition_fee: tuition,
            lab_fee: lab,
            other_fee: other,
            amount_paid: paid,
            due_date: None,
        }
    }

    #[test]
    fn grade_point_bands_keep_the_gap_below_fifty() {
        assert_eq!(grade_point(100.0), 10);
        assert_eq!(grade_point(90.0), 10);
        assert_eq!(grade_point(89.99), 9);
        assert_eq!(grade_point(80.0), 9);
        assert_eq!(grade_point(70.0), 8);
        assert_eq!(grade_point(60.0), 7);
        assert_eq!(grade_point(50.0), 6);
        assert_eq!(grade_point(49.99), 4);
        assert_eq!(grade_point(0.0), 4);

        let mut last = 0;
        let mut seen = Vec::new();
        for p in 0..=1000 {
            let gp = grade_point(f64::from(p) / 10.0);
            assert!(gp >= last, "grade point dropped at {}", p);
            last = gp;
            if !seen.contains(&gp) {
                seen.push(gp);
            }
        }
        assert_eq!(seen, vec![4, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn empty_input_yields_zero_cgpa() {
        let s = cgpa_summary(&[], Visibility::PublishedOnly);
        assert_eq!(s.cgpa, 0.0);
        assert_eq!(s.total_subjects, 0);
        assert!(s.subjects.is_empty());
        assert_eq!(s.overall_percentage, 0.0);
        assert!(semester_summary(&[], Visibility::All, Some(3)).summary.is_empty());
        assert!(attendance_summary(&[]).is_empty());
    }

    #[test]
    fn credit_weighting_shifts_cgpa() {
        let rows = vec![
            mark("a", Some(4.0), Some(1), ExamType::Final, 90.0, 100.0),
            mark("b", Some(2.0), Some(1), ExamType::Final, 50.0, 100.0),
        ];
        let s = cgpa_summary(&rows, Visibility::PublishedOnly);
        assert_eq!(s.cgpa, 8.67);
        assert_eq!(s.total_subjects, 2);
        assert_eq!(s.overall_percentage, 70.0);
    }

    #[test]
    fn cgpa_scenario_sums_components_per_subject() {
        let rows = vec![
            mark("x", Some(4.0), Some(1), ExamType::Internal1, 45.0, 50.0),
            mark("x", Some(4.0), Some(1), ExamType::Final, 40.0, 50.0),
            mark("y", Some(3.0), Some(1), ExamType::Final, 30.0, 100.0),
        ];
        let s = cgpa_summary(&rows, Visibility::PublishedOnly);
        assert_eq!(s.cgpa, 6.86);
        let x = s.subjects.iter().find(|s| s.subject_id == "x").expect("x");
        assert_eq!(x.total_obtained, 85.0);
        assert_eq!(x.total_max, 100.0);
        assert_eq!(x.percentage, 85.0);
        assert_eq!(x.grade_point, Some(9));
        assert!(x.components.is_none());
        let y = s.subjects.iter().find(|s| s.subject_id == "y").expect("y");
        assert_eq!(y.grade_point, Some(4));
    }

    #[test]
    fn cgpa_stays_within_bounds() {
        for a in (0..=100).step_by(7) {
            for b in (0..=100).step_by(11) {
                let rows = vec![
                    mark("a", Some(3.0), Some(1), ExamType::Final, f64::from(a), 100.0),
                    mark("b", Some(1.5), Some(2), ExamType::Lab, f64::from(b), 100.0),
                ];
                let c = cgpa_summary(&rows, Visibility::All).cgpa;
                assert!((0.0..=10.0).contains(&c), "cgpa {} out of bounds", c);
            }
        }
    }

    #[test]
    fn unpublished_rows_are_hidden_from_published_view() {
        let mut draft = mark("a", Some(4.0), Some(1), ExamType::Final, 20.0, 100.0);
        draft.published = false;
        let rows = vec![
            mark("a", Some(4.0), Some(1), ExamType::Internal1, 45.0, 50.0),
            draft,
        ];
        let published = subject_breakdown(&rows, Visibility::PublishedOnly);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].total_max, 50.0);
        let comps = published[0].components.as_ref().expect("components");
        assert!(!comps.contains_key(&ExamType::Final));

        let all = subject_breakdown(&rows, Visibility::All);
        assert_eq!(all[0].total_max, 150.0);
    }

    #[test]
    fn malformed_rows_are_excluded_not_fatal() {
        let mut no_max = mark("a", Some(4.0), Some(1), ExamType::Final, 20.0, 0.0);
        no_max.max_marks = None;
        let no_credits = mark("b", None, Some(1), ExamType::Final, 95.0, 100.0);
        let good = mark("c", Some(2.0), Some(1), ExamType::Final, 75.0, 100.0);
        let s = cgpa_summary(&[no_max, no_credits, good], Visibility::All);
        assert_eq!(s.total_subjects, 3);
        assert_eq!(s.cgpa, 8.0);
        let a = s.subjects.iter().find(|s| s.subject_id == "a").expect("a");
        assert_eq!(a.percentage, 0.0);
        assert_eq!(a.grade_point, None);
    }

    #[test]
    fn missing_subject_join_is_tolerated() {
        let rec = MarkRecord {
            id: "m1".into(),
            student_id: "s1".into(),
            subject_id: Some("ghost".into()),
            exam_type: "final".into(),
            marks_obtained: Some(10.0),
            max_marks: Some(20.0),
            published: true,
            updated_at: None,
        };
        let row = MarkRow::join(&rec, &HashMap::new()).expect("joined");
        assert_eq!(row.subject_code, None);
        assert_eq!(row.credits, None);
        let s = cgpa_summary(&[row], Visibility::PublishedOnly);
        assert_eq!(s.cgpa, 0.0);
        assert_eq!(s.overall_percentage, 50.0);

        let mut odd = rec.clone();
        odd.exam_type = "viva".into();
        assert!(MarkRow::join(&odd, &HashMap::new()).is_none());
        let mut orphan = rec;
        orphan.subject_id = None;
        assert!(MarkRow::join(&orphan, &HashMap::new()).is_none());
    }

    #[test]
    fn semester_summary_partitions_in_ascending_order() {
        let rows = vec![
            mark("c", Some(3.0), Some(2), ExamType::Final, 60.0, 100.0),
            mark("a", Some(4.0), Some(1), ExamType::Final, 90.0, 100.0),
            mark("b", Some(2.0), Some(1), ExamType::Final, 50.0, 100.0),
            mark("z", Some(2.0), None, ExamType::Final, 50.0, 100.0),
        ];
        let s = semester_summary(&rows, Visibility::All, Some(2));
        assert_eq!(s.current_semester, Some(2));
        let sems: Vec<i64> = s.summary.iter().map(|b| b.semester).collect();
        assert_eq!(sems, vec![1, 2]);
        assert_eq!(s.summary[0].subjects.len(), 2);
        assert_eq!(s.summary[0].total_obtained, 140.0);
        assert_eq!(s.summary[0].total_max, 200.0);
        assert_eq!(s.summary[0].percentage, 70.0);
        assert_eq!(s.summary[0].sgpa, 8.67);
        assert_eq!(s.summary[1].percentage, 60.0);
    }

    #[test]
    fn attendance_rounds_and_counts_only_present() {
        let rows = vec![
            present("m", "present"),
            present("m", "present"),
            present("m", "absent"),
            present("p", "late"),
            present("p", "excused"),
            present("p", "present"),
            present("p", "PRESENT"),
            present("p", "1"),
        ];
        let first = attendance_summary(&rows);
        let second = attendance_summary(&rows);
        assert_eq!(first, second);

        assert_eq!(first[0].subject_id, "m");
        assert_eq!(first[0].total_classes, 3);
        assert_eq!(first[0].present, 2);
        assert_eq!(first[0].attendance_percentage, 67);

        assert_eq!(first[1].total_classes, 5);
        assert_eq!(first[1].present, 2);
        assert_eq!(first[1].attendance_percentage, 40);

        assert_eq!(attendance_percentage(0, 0), 0);
        assert_eq!(attendance_percentage(1, 8), 13);
    }

    #[test]
    fn fee_status_scenarios() {
        let paid = fee_view(&fee(40000.0, 5000.0, 2000.0, 47000.0));
        assert_eq!(paid.total_fee, 47000.0);
        assert_eq!(paid.amount_due, 0.0);
        assert_eq!(paid.status, FeeStatus::Paid);

        assert_eq!(fee_view(&fee(40000.0, 5000.0, 2000.0, 0.0)).status, FeeStatus::Pending);
        let partial = fee_view(&fee(40000.0, 5000.0, 2000.0, 20000.0));
        assert_eq!(partial.status, FeeStatus::Partial);
        assert_eq!(partial.amount_due, 27000.0);

        let over = fee_view(&fee(100.0, 0.0, 0.0, 150.0));
        assert_eq!(over.amount_due, 0.0);
        assert_eq!(over.status, FeeStatus::Paid);
    }

    #[test]
    fn fee_summary_does_not_net_overpayments() {
        let mut s2 = fee(1000.0, 0.0, 0.0, 0.0);
        s2.semester = 2;
        let summary = fee_summary(&[s2, fee(500.0, 0.0, 0.0, 700.0)]);
        assert_eq!(summary.fees[0].record.semester, 1);
        assert_eq!(summary.summary.total_fees, 1500.0);
        assert_eq!(summary.summary.total_paid, 700.0);
        assert_eq!(summary.summary.total_due, 1000.0);
        assert_eq!(summary.summary.overall_status, FeeStatus::Partial);

        let v = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(v["fees"][0]["status"], "paid");
        assert_eq!(v["fees"][0]["tuition_fee"], 500.0);
        assert_eq!(v["summary"]["overall_status"], "partial");
    }
}
