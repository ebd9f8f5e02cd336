use std::collections::HashMap;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::models::CandidateEndpoint;

/// Picks up to `max_count` endpoints, one per provider, in random provider order.
///
/// Each provider is represented by its nearest endpoint; on equal distance the
/// endpoint listed first wins.
pub(crate) fn select<R: Rng + ?Sized>(
    candidates: &[CandidateEndpoint],
    max_count: usize,
    rng: &mut R,
) -> Vec<CandidateEndpoint> {
    let mut nearest: HashMap<&str, &CandidateEndpoint> = HashMap::new();
    let mut providers: Vec<&str> = Vec::new();

    for candidate in candidates {
        let sponsor = candidate.sponsor.as_str();
        match nearest.get_mut(sponsor) {
            Some(current) => {
                if candidate.distance_km < current.distance_km {
                    *current = candidate;
                }
            }
            None => {
                nearest.insert(sponsor, candidate);
                providers.push(sponsor);
            }
        }
    }

    providers.shuffle(rng);

    providers
        .into_iter()
        .take(max_count)
        .map(|sponsor| nearest[sponsor].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::models::fixtures::endpoint;

    fn candidates() -> Vec<CandidateEndpoint> {
        vec![
            endpoint("1", "Acme", 30.0),
            endpoint("2", "Beta", 12.0),
            endpoint("3", "Acme", 8.0),
            endpoint("4", "Gamma", 50.0),
            endpoint("5", "Beta", 12.0),
            endpoint("6", "Delta", 1.0),
            endpoint("7", "Epsilon", 3.0),
            endpoint("8", "Zeta", 2.0),
        ]
    }

    #[test]
    fn empty_input_selects_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(select(&[], 5, &mut rng).is_empty());
    }

    #[test]
    fn bounded_and_provider_distinct() {
        let input = candidates();
        let known: HashSet<_> = input.iter().map(|c| c.sponsor.clone()).collect();
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let picked = select(&input, 4, &mut rng);
            assert_eq!(picked.len(), 4);
            let sponsors: HashSet<_> = picked.iter().map(|c| c.sponsor.clone()).collect();
            assert_eq!(sponsors.len(), picked.len());
            assert!(sponsors.is_subset(&known));
        }
    }

    #[test]
    fn returns_every_provider_when_fewer_than_max() {
        let mut rng = StdRng::seed_from_u64(7);
        let picked = select(&candidates(), 50, &mut rng);
        assert_eq!(picked.len(), 6);
    }

    #[test]
    fn nearest_endpoint_represents_provider() {
        let mut rng = StdRng::seed_from_u64(3);
        let picked = select(&candidates(), 10, &mut rng);
        let by_sponsor: HashMap<_, _> = picked
            .iter()
            .map(|c| (c.sponsor.as_str(), c.id.as_str()))
            .collect();
        assert_eq!(by_sponsor["Acme"], "3");
        // equal distance keeps the first listed endpoint
        assert_eq!(by_sponsor["Beta"], "2");
    }

    #[test]
    fn same_seed_same_selection() {
        let a = select(&candidates(), 3, &mut StdRng::seed_from_u64(42));
        let b = select(&candidates(), 3, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_vary_the_order() {
        let orders: HashSet<Vec<String>> = (0..20)
            .map(|seed| {
                select(&candidates(), 6, &mut StdRng::seed_from_u64(seed))
                    .into_iter()
                    .map(|c| c.sponsor)
                    .collect()
            })
            .collect();
        assert!(orders.len() > 1);
    }
}
