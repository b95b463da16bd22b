//! Property tests for path parsing and formatting

use std::sync::Arc;

use arbor_store::{NamespaceRegistry, Path, PathFactory};
use proptest::prelude::*;

fn factory() -> PathFactory {
    PathFactory::new(Arc::new(NamespaceRegistry::new()))
}

fn segment() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["", "jcr:", "nt:", "mix:"]),
        "[a-z][a-z0-9_-]{0,8}",
        1u32..5,
    )
        .prop_map(|(prefix, local, index)| {
            if index > 1 {
                format!("{}{}[{}]", prefix, local, index)
            } else {
                format!("{}{}", prefix, local)
            }
        })
}

fn absolute_path() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 0..6).prop_map(|segments| format!("/{}", segments.join("/")))
}

proptest! {
    #[test]
    fn prefixed_form_round_trips(input in absolute_path()) {
        let factory = factory();
        let path = factory.parse(&input).unwrap();
        prop_assert_eq!(&*factory.format(&path), input.as_str());
    }

    #[test]
    fn expanded_form_round_trips(input in absolute_path()) {
        let path = factory().parse(&input).unwrap();
        let expanded = Path::parse_expanded(&path.to_string()).unwrap();
        prop_assert_eq!(expanded, path);
    }

    #[test]
    fn dot_dot_walks_to_the_parent(input in absolute_path()) {
        let factory = factory();
        let path = factory.parse(&input).unwrap();
        match path.parent() {
            Some(parent) => prop_assert_eq!(factory.resolve(&path, "..").unwrap(), parent),
            None => prop_assert!(factory.resolve(&path, "..").is_err()),
        }
    }

    #[test]
    fn ancestors_contain_descendants(input in absolute_path(), child in segment()) {
        let factory = factory();
        let path = factory.parse(&input).unwrap();
        let below = factory.resolve(&path, &child).unwrap();
        prop_assert!(path.is_ancestor_of(&below));
        prop_assert!(path.contains(&below));
        prop_assert_eq!(below.depth(), path.depth() + 1);
        prop_assert_eq!(below.parent(), Some(path));
    }
}
