use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Axis-aligned pixel rectangle, origin at the top-left of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    #[serde(rename = "w")]
    pub width: u32,
    #[serde(rename = "h")]
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Edges as `[top, right, bottom, left]`.
    pub fn location(&self) -> [u32; 4] {
        [self.y, self.right(), self.bottom(), self.x]
    }

    /// Shift by the origin of an enclosing region (crop-relative → frame coordinates).
    pub fn offset(&self, origin: &Rect) -> Rect {
        Rect {
            x: self.x + origin.x,
            y: self.y + origin.y,
            ..*self
        }
    }

    /// Intersection with a `width`×`height` image, if any pixels remain.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let right = self.right().min(width);
        let bottom = self.bottom().min(height);
        let clamped = Rect::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y));
        (!clamped.is_empty()).then_some(clamped)
    }
}

/// An enrolled person. The roll number is the stable identity key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub roll_no: String,
    pub name: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub classroom: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    /// Email or phone, free-form.
    #[serde(default)]
    pub contact: String,
}

/// One appended attendance entry with a snapshot of the identity's display fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub roll_no: String,
    pub name: String,
    pub department: String,
    pub classroom: String,
    pub logged_at: NaiveDateTime,
}

impl AttendanceRecord {
    /// Calendar day the record counts toward.
    pub fn day(&self) -> NaiveDate {
        self.logged_at.date()
    }
}

/// Capture-quality hint for the caller's UI. Never blocks identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusHint {
    FaceLocated,
    Stabilizing,
}

/// Per-face output of one identification pass. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// `None` when the face is unknown or below the acceptance threshold.
    pub roll_no: Option<String>,
    /// Face edges as `[top, right, bottom, left]`.
    pub location: [u32; 4],
    /// Eye regions in frame coordinates.
    pub eyes: Vec<Rect>,
    pub has_eyes: bool,
    pub suggestion: StatusHint,
    /// Distance of the nearest gallery profile (lower = closer), if matching ran.
    pub score: Option<f32>,
}

impl DetectionResult {
    pub fn is_known(&self) -> bool {
        self.roll_no.is_some()
    }

    /// Identity key, or `"Unknown"`.
    pub fn label(&self) -> &str {
        self.roll_no.as_deref().unwrap_or("Unknown")
    }
}

/// Outcome of an idempotent attendance log attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    NewLog,
    AlreadyLogged,
    Unknown,
}
