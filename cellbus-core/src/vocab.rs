//! Request/response vocabulary of the control-plane consumers.
//!
//! The substrate transports these opaquely; the types live here so the
//! waypoint store, robot adapter, UI and vision modules all share one
//! definition and match requests exhaustively instead of falling through to
//! a runtime "unknown request" branch.

use serde::{Deserialize, Serialize};

/// Requests exchanged between the control-plane modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", content = "args")]
pub enum Request {
    /// Store a new waypoint.
    #[serde(rename = "NEW_WP")]
    NewWaypoint {
        /// Human-readable waypoint name.
        name: String,
        /// Joint coordinates captured from the robot.
        coordinates: Vec<f64>,
    },
    /// Fetch one waypoint.
    #[serde(rename = "GET_WP")]
    GetWaypoint {
        /// Waypoint id.
        id: u64,
    },
    /// List all stored waypoint ids.
    #[serde(rename = "GET_ALL_WP_IDS")]
    GetAllWaypointIds,
    /// Delete a waypoint.
    #[serde(rename = "DEL_WP")]
    DeleteWaypoint {
        /// Waypoint id.
        id: u64,
    },
    /// Rename a waypoint.
    #[serde(rename = "CHANGE_WP_NAME")]
    ChangeWaypointName {
        /// Waypoint id.
        id: u64,
        /// New name.
        name: String,
    },
    /// Create a new trajectory.
    #[serde(rename = "NEW_TP")]
    NewTrajectory {
        /// Trajectory name.
        name: String,
    },
    /// Fetch a trajectory.
    #[serde(rename = "GET_TP")]
    GetTrajectory {
        /// Trajectory id.
        id: u64,
    },
    /// Append a waypoint to a trajectory.
    #[serde(rename = "ADD_TO_TP")]
    AddToTrajectory {
        /// Trajectory id.
        trajectory: u64,
        /// Waypoint id to append.
        waypoint: u64,
    },
    /// Remove a waypoint from a trajectory.
    #[serde(rename = "RM_FROM_TP")]
    RemoveFromTrajectory {
        /// Trajectory id.
        trajectory: u64,
        /// Waypoint id to remove.
        waypoint: u64,
    },
    /// Put the robot into hand-guided teaching mode.
    #[serde(rename = "BACKDRIVING_MODE")]
    BackdrivingMode,
    /// Leave hand-guided teaching mode.
    #[serde(rename = "STOP_BACKDRIVING")]
    StopBackdriving,
    /// Move the robot to a stored waypoint.
    #[serde(rename = "GOTO_WP")]
    GotoWaypoint {
        /// Waypoint id.
        id: u64,
    },
    /// Execute a stored trajectory.
    #[serde(rename = "EXECUTE_TP")]
    ExecuteTrajectory {
        /// Trajectory id.
        id: u64,
    },
    /// Ask a module to shut down.
    #[serde(rename = "SHUTDOWN")]
    Shutdown,
}

/// Responses exchanged between the control-plane modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", content = "data")]
pub enum Response {
    /// A stored waypoint.
    #[serde(rename = "WP")]
    Waypoint {
        /// Waypoint id.
        id: u64,
        /// Waypoint name.
        name: String,
        /// Joint coordinates.
        coordinates: Vec<f64>,
    },
    /// All stored waypoint ids.
    #[serde(rename = "WP_IDS")]
    WaypointIds(Vec<u64>),
    /// A stored trajectory.
    #[serde(rename = "TP")]
    Trajectory {
        /// Trajectory id.
        id: u64,
        /// Trajectory name.
        name: String,
        /// Ordered waypoint ids.
        waypoints: Vec<u64>,
    },
    /// The request completed without data to return.
    #[serde(rename = "DONE")]
    Done,
    /// The handler failed for an unanticipated reason.
    #[serde(rename = "UNEXPECTED_FAILURE")]
    UnexpectedFailure,
    /// The request is not part of the receiver's vocabulary.
    #[serde(rename = "UNKNOWN_REQUEST")]
    UnknownRequest,
    /// The referenced waypoint or trajectory does not exist.
    #[serde(rename = "NONEXISTENT_OBJECT")]
    NonexistentObject,
    /// The robot lock could not be acquired.
    #[serde(rename = "LOCK_FAILED")]
    LockFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_tag_matches_wire_vocabulary() {
        let json = serde_json::to_value(&Request::GetWaypoint { id: 4 }).expect("serialize");
        assert_eq!(json["request"], "GET_WP");
        assert_eq!(json["args"]["id"], 4);
    }

    #[test]
    fn unit_request_has_no_args() {
        let json = serde_json::to_value(&Request::GetAllWaypointIds).expect("serialize");
        assert_eq!(json["request"], "GET_ALL_WP_IDS");
    }

    #[test]
    fn response_roundtrip() {
        let response = Response::Waypoint {
            id: 1,
            name: "home".to_string(),
            coordinates: vec![0.0, 1.57, 0.0],
        };
        let payload = serde_json::to_vec(&response).expect("serialize");
        let back: Response = serde_json::from_slice(&payload).expect("deserialize");
        assert_eq!(back, response);
    }

    #[test]
    fn failure_markers_carry_their_literal_names() {
        for (response, tag) in [
            (Response::UnexpectedFailure, "UNEXPECTED_FAILURE"),
            (Response::UnknownRequest, "UNKNOWN_REQUEST"),
            (Response::NonexistentObject, "NONEXISTENT_OBJECT"),
            (Response::LockFailed, "LOCK_FAILED"),
        ] {
            let json = serde_json::to_value(&response).expect("serialize");
            assert_eq!(json["response"], tag);
        }
    }

    #[test]
    fn unknown_request_tag_fails_to_decode() {
        let result: Result<Request, _> =
            serde_json::from_str(r#"{"request":"SELF_DESTRUCT","args":null}"#);
        assert!(result.is_err());
    }
}
