//! Per-request authorization predicates.
//!
//! Every predicate denies when the resource is absent. Ownership is
//! decided by account id, never by role alone.

use crate::identity::Principal;
use crate::models::{Course, Role};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateCourse,
    ViewCourse,
    MutateCourse,
    SelfEnroll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

pub fn can_create_course(principal: &Principal) -> bool {
    principal.role == Role::Teacher
}

pub fn can_view_course(principal: &Principal, course: Option<&Course>) -> bool {
    match course {
        Some(course) => course.teacher == principal.id || course.is_enrolled(principal.id),
        None => false,
    }
}

/// Update, delete and bulk enrollment.
pub fn can_mutate_course(principal: &Principal, course: Option<&Course>) -> bool {
    match course {
        Some(course) => principal.role == Role::Teacher && course.teacher == principal.id,
        None => false,
    }
}

pub fn can_self_enroll(principal: &Principal, course: Option<&Course>) -> bool {
    match course {
        Some(course) => principal.role == Role::Student && !course.is_enrolled(principal.id),
        None => false,
    }
}

pub fn decide(principal: &Principal, action: Action, course: Option<&Course>) -> Decision {
    match action {
        Action::CreateCourse => can_create_course(principal),
        Action::ViewCourse => can_view_course(principal, course),
        Action::MutateCourse => can_mutate_course(principal, course),
        Action::SelfEnroll => can_self_enroll(principal, course),
    }
    .into()
}

/// [`decide`], with a deny surfaced as `Forbidden`.
pub fn authorize(principal: &Principal, action: Action, course: Option<&Course>) -> Result<(), Error> {
    match decide(principal, action, course) {
        Decision::Allow => Ok(()),
        Decision::Deny => {
            log::warn!(
                "denied {:?} for {} account {} on course {:?}",
                action,
                principal.role,
                principal.id,
                course.map(|c| c.id)
            );
            Err(Error::forbidden(match action {
                Action::CreateCourse => "Only teachers can create courses",
                Action::ViewCourse => "Not a member of this course",
                Action::MutateCourse => "Only the course teacher can modify this course",
                Action::SelfEnroll => "Only students can join courses",
            }))
        }
    }
}
