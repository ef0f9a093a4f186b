mod common;

mod verifier_tests {
    use crate::common::{id, ymd, StaticProvider, TestCa};
    use mesh_mutual_auth::{verify_peer_certificate, VerifyError};
    use rustls::pki_types::{CertificateDer, UnixTime};

    #[test]
    fn test_empty_chain_list_is_rejected() {
        let ca = TestCa::new("mesh root");
        let provider = StaticProvider::new(ca.bundle());

        let err = verify_peer_certificate(
            provider.as_ref(),
            Some(id(10)),
            &ca.bundle(),
            &[],
            UnixTime::now(),
        )
        .unwrap_err();

        assert!(matches!(err, VerifyError::EmptyChainList), "{err:?}");
    }

    #[test]
    fn test_garbage_der_is_a_parse_error() {
        let ca = TestCa::new("mesh root");
        let provider = StaticProvider::new(ca.bundle());
        let garbage = CertificateDer::from(vec![0xde, 0xad, 0xbe, 0xef]);

        let err = verify_peer_certificate(
            provider.as_ref(),
            None,
            &ca.bundle(),
            &[&[garbage]],
            UnixTime::now(),
        )
        .unwrap_err();

        assert!(matches!(err, VerifyError::CertificateParse(_)), "{err:?}");
    }

    #[test]
    fn test_chain_of_only_authorities_has_no_leaf() {
        let ca = TestCa::new("mesh root");
        let intermediate = ca.intermediate("mesh intermediate");
        let provider = StaticProvider::new(ca.bundle());

        let err = verify_peer_certificate(
            provider.as_ref(),
            None,
            &ca.bundle(),
            &[&[intermediate.der(), ca.der()]],
            UnixTime::now(),
        )
        .unwrap_err();

        assert!(matches!(err, VerifyError::MissingLeafCertificate), "{err:?}");
    }

    #[test]
    fn test_valid_leaf_returns_its_expiration() {
        let ca = TestCa::new("mesh root");
        let provider = StaticProvider::new(ca.bundle());
        let leaf = ca.issue(id(10), ymd(2029, 6, 1));

        let expiration = verify_peer_certificate(
            provider.as_ref(),
            Some(id(10)),
            &ca.bundle(),
            &[&[leaf.cert]],
            UnixTime::now(),
        )
        .unwrap();

        assert_eq!(expiration, ymd(2029, 6, 1));
    }

    #[test]
    fn test_leaf_from_untrusted_root_fails_chain_verification() {
        let trusted = TestCa::new("mesh root");
        let rogue = TestCa::new("rogue root");
        let provider = StaticProvider::new(trusted.bundle());
        let leaf = rogue.issue(id(10), ymd(2029, 6, 1));

        let err = verify_peer_certificate(
            provider.as_ref(),
            Some(id(10)),
            &trusted.bundle(),
            &[&[leaf.cert]],
            UnixTime::now(),
        )
        .unwrap_err();

        assert!(
            matches!(err, VerifyError::ChainVerificationFailed(_)),
            "{err:?}"
        );
    }

    #[test]
    fn test_expired_leaf_fails_chain_verification() {
        let ca = TestCa::new("mesh root");
        let provider = StaticProvider::new(ca.bundle());
        let leaf = ca.issue(id(10), ymd(2020, 1, 1));

        let err = verify_peer_certificate(
            provider.as_ref(),
            Some(id(10)),
            &ca.bundle(),
            &[&[leaf.cert]],
            UnixTime::now(),
        )
        .unwrap_err();

        assert!(
            matches!(err, VerifyError::ChainVerificationFailed(_)),
            "{err:?}"
        );
    }

    #[test]
    fn test_leaf_for_another_identity_is_a_mismatch() {
        let ca = TestCa::new("mesh root");
        let provider = StaticProvider::new(ca.bundle());
        let leaf = ca.issue(id(11), ymd(2029, 6, 1));

        let err = verify_peer_certificate(
            provider.as_ref(),
            Some(id(10)),
            &ca.bundle(),
            &[&[leaf.cert]],
            UnixTime::now(),
        )
        .unwrap_err();

        assert!(
            matches!(err, VerifyError::IdentityMismatch(expected) if expected == id(10)),
            "{err:?}"
        );
    }

    #[test]
    fn test_no_expected_identity_skips_san_check() {
        let ca = TestCa::new("mesh root");
        let provider = StaticProvider::new(ca.bundle());
        let leaf = ca.issue(id(11), ymd(2029, 6, 1));

        let expiration = verify_peer_certificate(
            provider.as_ref(),
            None,
            &ca.bundle(),
            &[&[leaf.cert]],
            UnixTime::now(),
        )
        .unwrap();

        assert_eq!(expiration, ymd(2029, 6, 1));
    }

    #[test]
    fn test_failing_identity_predicate_is_reported() {
        let ca = TestCa::new("mesh root");
        let provider = StaticProvider::new(ca.bundle());
        provider.fail_validation();
        let leaf = ca.issue(id(10), ymd(2029, 6, 1));

        let err = verify_peer_certificate(
            provider.as_ref(),
            Some(id(10)),
            &ca.bundle(),
            &[&[leaf.cert]],
            UnixTime::now(),
        )
        .unwrap_err();

        assert!(
            matches!(err, VerifyError::IdentityValidation { identity, .. } if identity == id(10)),
            "{err:?}"
        );

        let source = std::error::Error::source(&err).expect("provider error is kept as source");
        assert_eq!(source.to_string(), "SAN lookup unavailable");
    }

    #[test]
    fn test_intermediate_is_found_regardless_of_position() {
        let ca = TestCa::new("mesh root");
        let intermediate = ca.intermediate("mesh intermediate");
        let provider = StaticProvider::new(ca.bundle());
        let leaf = intermediate.issue(id(10), ymd(2029, 6, 1));

        for chain in [
            vec![leaf.cert.clone(), intermediate.der()],
            vec![intermediate.der(), leaf.cert.clone()],
        ] {
            let expiration = verify_peer_certificate(
                provider.as_ref(),
                Some(id(10)),
                &ca.bundle(),
                &[chain.as_slice()],
                UnixTime::now(),
            )
            .unwrap();

            assert_eq!(expiration, ymd(2029, 6, 1));
        }
    }

    #[test]
    fn test_missing_intermediate_fails_chain_verification() {
        let ca = TestCa::new("mesh root");
        let intermediate = ca.intermediate("mesh intermediate");
        let provider = StaticProvider::new(ca.bundle());
        let leaf = intermediate.issue(id(10), ymd(2029, 6, 1));

        let err = verify_peer_certificate(
            provider.as_ref(),
            Some(id(10)),
            &ca.bundle(),
            &[&[leaf.cert]],
            UnixTime::now(),
        )
        .unwrap_err();

        assert!(
            matches!(err, VerifyError::ChainVerificationFailed(_)),
            "{err:?}"
        );
    }

    #[test]
    fn test_multiple_chains_yield_soonest_expiration() {
        let ca = TestCa::new("mesh root");
        let provider = StaticProvider::new(ca.bundle());
        let later = ca.issue(id(10), ymd(2031, 3, 1));
        let sooner = ca.issue(id(10), ymd(2029, 6, 1));

        let expiration = verify_peer_certificate(
            provider.as_ref(),
            Some(id(10)),
            &ca.bundle(),
            &[&[later.cert], &[sooner.cert]],
            UnixTime::now(),
        )
        .unwrap();

        assert_eq!(expiration, ymd(2029, 6, 1));
    }

    #[test]
    fn test_one_bad_chain_fails_the_whole_set() {
        let ca = TestCa::new("mesh root");
        let rogue = TestCa::new("rogue root");
        let provider = StaticProvider::new(ca.bundle());
        let good = ca.issue(id(10), ymd(2029, 6, 1));
        let bad = rogue.issue(id(10), ymd(2029, 6, 1));

        let err = verify_peer_certificate(
            provider.as_ref(),
            Some(id(10)),
            &ca.bundle(),
            &[&[good.cert], &[bad.cert]],
            UnixTime::now(),
        )
        .unwrap_err();

        assert!(
            matches!(err, VerifyError::ChainVerificationFailed(_)),
            "{err:?}"
        );
    }
}
