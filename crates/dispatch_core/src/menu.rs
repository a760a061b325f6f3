//! The per-vehicle itinerary: an ordered menu of planned courses.
//!
//! A [`Menu`] is immutable after construction; the controller replaces a
//! vehicle's menu wholesale instead of mutating it. [`Menu::of`] validates the
//! ordering invariants on every construction: no course value appears twice,
//! and every dropoff follows the pickup of the same request.

use std::sync::{Arc, OnceLock};

use h3o::CellIndex;

use crate::ecs::RequestId;
use crate::error::ItineraryError;
use crate::spatial::distance_km_between_cells;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CourseKind {
    Pickup,
    Dropoff,
    Reposition,
    Redirect,
}

/// A single planned stop. Owned by exactly one vehicle's menu at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Course {
    pub kind: CourseKind,
    pub target: CellIndex,
    pub request: Option<RequestId>,
}

impl Course {
    pub fn pickup(request: RequestId, target: CellIndex) -> Self {
        Self {
            kind: CourseKind::Pickup,
            target,
            request: Some(request),
        }
    }

    pub fn dropoff(request: RequestId, target: CellIndex) -> Self {
        Self {
            kind: CourseKind::Dropoff,
            target,
            request: Some(request),
        }
    }

    pub fn reposition(target: CellIndex) -> Self {
        Self {
            kind: CourseKind::Reposition,
            target,
            request: None,
        }
    }

    pub fn redirect(target: CellIndex) -> Self {
        Self {
            kind: CourseKind::Redirect,
            target,
            request: None,
        }
    }

    /// Whether this course serves a passenger (pickup or dropoff).
    pub fn is_passenger_bound(&self) -> bool {
        matches!(self.kind, CourseKind::Pickup | CourseKind::Dropoff)
    }
}

/// An ordered, duplicate-free sequence of courses for one vehicle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
    courses: Arc<[Course]>,
    onboard: usize,
}

impl Menu {
    /// Validating constructor. Fails when a course value appears twice or a
    /// dropoff precedes the pickup of the same request.
    pub fn of(courses: Vec<Course>) -> Result<Self, ItineraryError> {
        for (i, course) in courses.iter().enumerate() {
            if courses[..i].contains(course) {
                return Err(ItineraryError::DuplicateCourse(*course));
            }
        }
        for (i, course) in courses.iter().enumerate() {
            if course.kind != CourseKind::Dropoff {
                continue;
            }
            let request = course.request;
            let pickup_after = courses[i + 1..]
                .iter()
                .any(|c| c.kind == CourseKind::Pickup && c.request == request);
            if pickup_after {
                // request is always Some for pickup/dropoff constructors
                let id = request.unwrap_or(RequestId(u64::MAX));
                return Err(ItineraryError::DropoffBeforePickup(id));
            }
        }
        Ok(Self::from_checked(courses))
    }

    /// Shared canonical idle menu.
    pub fn empty() -> Self {
        static EMPTY: OnceLock<Menu> = OnceLock::new();
        EMPTY.get_or_init(|| Menu::from_checked(Vec::new())).clone()
    }

    // Caller guarantees the invariants already hold.
    fn from_checked(courses: Vec<Course>) -> Self {
        let onboard = onboard_count(&courses);
        Self {
            courses: courses.into(),
            onboard,
        }
    }

    /// Read-only ordered view of the planned courses.
    pub fn courses(&self) -> &[Course] {
        &self.courses
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.courses.len()
    }

    pub fn last_course(&self) -> Option<&Course> {
        self.courses.last()
    }

    /// Number of currently-picked-up-but-not-dropped-off requests implied by
    /// the course sequence. Cached at construction.
    pub fn onboard_count(&self) -> usize {
        self.onboard
    }

    /// Whether any course serves a passenger. Vehicles with passenger-bound
    /// courses are not eligible for new matches or rebalancing.
    pub fn has_passenger_courses(&self) -> bool {
        self.courses.iter().any(Course::is_passenger_bound)
    }

    /// Menu with the first course matching `predicate` removed. Removing a
    /// course cannot violate the construction invariants.
    pub fn without_first<F>(&self, predicate: F) -> Menu
    where
        F: Fn(&Course) -> bool,
    {
        match self.courses.iter().position(|c| predicate(c)) {
            Some(index) => {
                let mut remaining: Vec<Course> = self.courses.to_vec();
                remaining.remove(index);
                Menu::from_checked(remaining)
            }
            None => self.clone(),
        }
    }

    /// Menu with every course referencing `request` removed (cancellation).
    pub fn without_request(&self, request: RequestId) -> Menu {
        if !self.courses.iter().any(|c| c.request == Some(request)) {
            return self.clone();
        }
        let remaining: Vec<Course> = self
            .courses
            .iter()
            .copied()
            .filter(|c| c.request != Some(request))
            .collect();
        Menu::from_checked(remaining)
    }
}

fn onboard_count(courses: &[Course]) -> usize {
    courses
        .iter()
        .filter(|c| c.kind == CourseKind::Dropoff)
        .filter(|c| {
            !courses
                .iter()
                .any(|p| p.kind == CourseKind::Pickup && p.request == c.request)
        })
        .count()
}

/// Greedy dropoff ordering: starting from a menu whose courses form a
/// pickup-only prefix followed by a dropoff-only suffix, repeatedly append
/// the pending dropoff nearest to the last placed course until the pending
/// set is empty. Not globally optimal; ties keep the first pending course in
/// iteration order.
///
/// Preconditions (violations fail with [`ItineraryError`]): no redirect
/// courses anywhere, all pickups precede all dropoffs, every pending course
/// is a dropoff, and at least one course is already placed.
pub fn fast_dropoff_tour(menu: &Menu, pending: Vec<Course>) -> Result<Menu, ItineraryError> {
    if menu.courses().iter().any(|c| c.kind == CourseKind::Redirect) {
        return Err(ItineraryError::UnexpectedRedirect);
    }
    if !pickups_first(menu.courses()) {
        return Err(ItineraryError::PickupsNotFirst);
    }
    for course in &pending {
        match course.kind {
            CourseKind::Dropoff => {}
            CourseKind::Redirect => return Err(ItineraryError::UnexpectedRedirect),
            _ => return Err(ItineraryError::NotADropoff(*course)),
        }
    }
    if menu.is_empty() && !pending.is_empty() {
        return Err(ItineraryError::MissingReference);
    }

    let mut placed: Vec<Course> = menu.courses().to_vec();
    let mut remaining = pending;
    while !remaining.is_empty() {
        let reference = placed
            .last()
            .map(|c| c.target)
            .ok_or(ItineraryError::MissingReference)?;
        let mut best = 0;
        let mut best_distance = f64::INFINITY;
        for (i, course) in remaining.iter().enumerate() {
            let d = distance_km_between_cells(reference, course.target);
            if d < best_distance {
                best_distance = d;
                best = i;
            }
        }
        placed.push(remaining.remove(best));
    }
    Menu::of(placed)
}

fn pickups_first(courses: &[Course]) -> bool {
    let first_dropoff = courses
        .iter()
        .position(|c| c.kind != CourseKind::Pickup)
        .unwrap_or(courses.len());
    courses[first_dropoff..]
        .iter()
        .all(|c| c.kind == CourseKind::Dropoff)
}
