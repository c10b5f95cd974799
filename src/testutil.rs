//! Test PKI fixtures generated at test time.

use rcgen::{
    date_time_ymd, BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer,
    KeyPair, KeyUsagePurpose,
};

/// A generated certificate in both encodings.
pub struct TestCert {
    pub pem: String,
    pub der: Vec<u8>,
}

/// Root → intermediate → leaf hierarchy plus a few misfits.
pub struct TestPki {
    /// Self-signed root CA (`CN=Test Root CA`).
    pub root: TestCert,
    /// Intermediate CA issued by the root.
    pub intermediate: TestCert,
    /// Client certificate `CN=alice` issued by the intermediate.
    pub leaf: TestCert,
    /// Second client certificate `CN=bob` issued by the intermediate.
    pub other_leaf: TestCert,
    /// Client certificate that expired in 2001.
    pub expired_leaf: TestCert,
    /// Client certificate valid only from 2999.
    pub future_leaf: TestCert,
    /// Self-signed certificate sharing no issuer with the hierarchy.
    pub stranger: TestCert,
    /// Client certificate claiming the intermediate's DN but signed by another key.
    pub forged_leaf: TestCert,
}

impl TestPki {
    pub fn new() -> Self {
        let root_key = KeyPair::generate().unwrap();
        let root_params = ca_params("Test Root CA");
        let root = root_params.clone().self_signed(&root_key).unwrap();
        let root_issuer = Issuer::new(root_params, root_key);

        let intermediate_key = KeyPair::generate().unwrap();
        let intermediate_params = ca_params("Test Intermediate CA");
        let intermediate = intermediate_params
            .clone()
            .signed_by(&intermediate_key, &root_issuer)
            .unwrap();
        let intermediate_issuer = Issuer::new(intermediate_params, intermediate_key);

        let leaf = client_cert("alice", None, &intermediate_issuer);
        let other_leaf = client_cert("bob", None, &intermediate_issuer);
        let expired_leaf = client_cert(
            "alice",
            Some(((2000, 1, 1), (2001, 1, 1))),
            &intermediate_issuer,
        );
        let future_leaf = client_cert(
            "alice",
            Some(((2999, 1, 1), (3000, 1, 1))),
            &intermediate_issuer,
        );

        let stranger_key = KeyPair::generate().unwrap();
        let stranger = client_params("stranger", None).self_signed(&stranger_key).unwrap();

        let rogue_key = KeyPair::generate().unwrap();
        let rogue_issuer = Issuer::new(ca_params("Test Intermediate CA"), rogue_key);
        let forged_leaf = client_cert("alice", None, &rogue_issuer);

        Self {
            root: TestCert {
                pem: root.pem(),
                der: root.der().to_vec(),
            },
            intermediate: TestCert {
                pem: intermediate.pem(),
                der: intermediate.der().to_vec(),
            },
            leaf,
            other_leaf,
            expired_leaf,
            future_leaf,
            stranger: TestCert {
                pem: stranger.pem(),
                der: stranger.der().to_vec(),
            },
            forged_leaf,
        }
    }
}

/// CA certificate `CN=common_name`, self-signed or issued under a fresh key
/// holding the DN `CN=issuer`.
pub fn ca_cert(common_name: &str, issuer: Option<&str>) -> TestCert {
    let key = KeyPair::generate().unwrap();
    let cert = match issuer {
        None => ca_params(common_name).self_signed(&key).unwrap(),
        Some(issuer_name) => {
            let issuer = Issuer::new(ca_params(issuer_name), KeyPair::generate().unwrap());
            ca_params(common_name).signed_by(&key, &issuer).unwrap()
        }
    };
    TestCert {
        pem: cert.pem(),
        der: cert.der().to_vec(),
    }
}

fn ca_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params
}

/// `(not_before, not_after)` as `(year, month, day)`.
type Validity = ((i32, u8, u8), (i32, u8, u8));

fn client_params(common_name: &str, validity: Option<Validity>) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    if let Some(((by, bm, bd), (ay, am, ad))) = validity {
        params.not_before = date_time_ymd(by, bm, bd);
        params.not_after = date_time_ymd(ay, am, ad);
    }
    params
}

fn client_cert(
    common_name: &str,
    validity: Option<Validity>,
    issuer: &Issuer<'_, KeyPair>,
) -> TestCert {
    let key = KeyPair::generate().unwrap();
    let cert = client_params(common_name, validity)
        .signed_by(&key, issuer)
        .unwrap();
    TestCert {
        pem: cert.pem(),
        der: cert.der().to_vec(),
    }
}
