use omnid::core::resource::Labels;
use omnid::core::selector::{Selector, Selectors};

fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs.iter().copied().collect()
}

#[test]
fn test_presence_and_absence() {
    let set = labels(&[("cluster", "c1"), ("role", "worker")]);

    assert!(Selector::parse("cluster").unwrap().matches(&set));
    assert!(!Selector::parse("missing").unwrap().matches(&set));
    assert!(Selector::parse("!missing").unwrap().matches(&set));
    assert!(!Selector::parse("!cluster").unwrap().matches(&set));
}

#[test]
fn test_equality_and_inequality() {
    let set = labels(&[("cluster", "c1")]);

    assert!(Selector::parse("cluster=c1").unwrap().matches(&set));
    assert!(!Selector::parse("cluster=c2").unwrap().matches(&set));
    assert!(Selector::parse("cluster!=c2").unwrap().matches(&set));
    assert!(!Selector::parse("cluster!=c1").unwrap().matches(&set));
    // Inequality on an absent key holds.
    assert!(Selector::parse("zone!=eu-1").unwrap().matches(&set));
}

#[test]
fn test_value_in_set() {
    let set = labels(&[("zone", "eu-2")]);

    assert!(Selector::parse("zone in (eu-1, eu-2)").unwrap().matches(&set));
    assert!(!Selector::parse("zone in (us-1, us-2)").unwrap().matches(&set));
    assert!(!Selector::parse("region in (eu-2)").unwrap().matches(&set));
}

#[test]
fn test_conjunction_short_circuits_on_failure() {
    let set = labels(&[("cluster", "c1"), ("role", "worker")]);

    assert!(
        Selector::parse("cluster=c1,role=worker,!deleted")
            .unwrap()
            .matches(&set)
    );
    assert!(!Selector::parse("cluster=c1,role=controlplane").unwrap().matches(&set));
}

#[test]
fn test_commas_inside_value_lists_do_not_split_atoms() {
    let selector = Selector::parse("zone in (eu-1, eu-2),cluster=c1").unwrap();
    assert_eq!(selector.atoms().len(), 2);

    let set = labels(&[("zone", "eu-1"), ("cluster", "c1")]);
    assert!(selector.matches(&set));
}

#[test]
fn test_or_composition_at_the_boundary() {
    let selectors = Selectors::parse_any(&[
        "cluster=c1".to_string(),
        "cluster=c2".to_string(),
    ])
    .unwrap();

    assert!(selectors.matches(&labels(&[("cluster", "c1")])));
    assert!(selectors.matches(&labels(&[("cluster", "c2")])));
    assert!(!selectors.matches(&labels(&[("cluster", "c3")])));

    // The empty OR set matches everything.
    assert!(Selectors::all().matches(&labels(&[])));
}

#[test]
fn test_parse_errors() {
    assert!(Selector::parse("zone in (").is_err());
    assert!(Selector::parse("zone in ()").is_err());
    assert!(Selector::parse("=value").is_err());
    assert!(Selector::parse("bad key=v").is_err());
}
