//! Tests for prefix matching and residual paths

use waypoint::http::request::{Method, RequestBuilder};
use waypoint::proxy::router::RequestRouter;
use waypoint::proxy::routes::{MatchPolicy, Route, RouteTable};

fn router(policy: MatchPolicy, routes: &[(&str, &str)]) -> RequestRouter {
    RequestRouter::new(RouteTable::from_routes(
        routes.iter().map(|(p, port)| Route::new(*p, *port)),
        policy,
    ))
}

#[test]
fn test_match_strips_prefix() {
    let router = router(MatchPolicy::LongestPrefix, &[("/api/", "8080")]);
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/api/users")
        .query("active=true")
        .build()
        .unwrap();

    let matched = router.route(&request).unwrap();
    assert_eq!(matched.route.target_port, "8080");
    assert_eq!(matched.residual, b"users");
}

#[test]
fn test_exact_prefix_leaves_empty_residual() {
    let router = router(MatchPolicy::LongestPrefix, &[("/api", "8080")]);
    let matched = router.match_path(b"/api").unwrap();
    assert_eq!(matched.residual, b"");
}

#[test]
fn test_prefix_is_anchored_at_start() {
    let router = router(MatchPolicy::LongestPrefix, &[("/api", "8080")]);
    assert!(router.match_path(b"/v1/api/users").is_none());
    assert!(router.match_path(b"api").is_none());
}

#[test]
fn test_no_routes_never_match() {
    let router = RequestRouter::new(RouteTable::empty(MatchPolicy::LongestPrefix));
    assert!(router.match_path(b"/").is_none());
    assert!(router.match_path(b"/anything").is_none());
}

#[test]
fn test_prefix_match_is_textual_not_segment_based() {
    let router = router(MatchPolicy::LongestPrefix, &[("/app", "8080")]);
    let matched = router.match_path(b"/apple/pie").unwrap();
    assert_eq!(matched.residual, b"le/pie");
}

#[test]
fn test_longest_prefix_wins() {
    let router = router(
        MatchPolicy::LongestPrefix,
        &[("/api", "1000"), ("/api/v2/", "2000")],
    );
    let matched = router.match_path(b"/api/v2/items").unwrap();
    assert_eq!(matched.route.target_port, "2000");
    assert_eq!(matched.residual, b"items");

    let matched = router.match_path(b"/api/v1/items").unwrap();
    assert_eq!(matched.route.target_port, "1000");
}

#[test]
fn test_lexicographic_first_match_wins() {
    let router = router(
        MatchPolicy::Lexicographic,
        &[("/api", "1000"), ("/api/v2/", "2000")],
    );
    let matched = router.match_path(b"/api/v2/items").unwrap();
    assert_eq!(matched.route.target_port, "1000");
    assert_eq!(matched.residual, b"/v2/items");
}

#[test]
fn test_match_on_decoded_non_utf8_path() {
    let router = router(MatchPolicy::LongestPrefix, &[("/api/", "8080")]);
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path(&b"/api/\xff/x"[..])
        .build()
        .unwrap();

    let matched = router.route(&request).unwrap();
    assert_eq!(matched.residual, b"\xff/x");
}
