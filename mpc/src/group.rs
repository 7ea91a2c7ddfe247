use std::fmt;

use num_bigint::{BigInt, BigUint};
use num_traits::{One, Zero};
use rand::{rngs::OsRng, RngCore};

/// Exponent-domain value, always reduced modulo the subgroup order q.
pub type Scalar = BigUint;

/// Member of the order-q subgroup of (Z/pZ)*, in [1, p-1].
pub type GroupElement = BigUint;

/// Error type for group arithmetic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupError {
    RngUnavailable,
    NotInvertible,
    BadParams(&'static str),
}

impl fmt::Display for GroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::RngUnavailable => write!(f, "OS randomness source unavailable"),
            Self::NotInvertible => write!(f, "Element has no modular inverse"),
            Self::BadParams(msg) => write!(f, "Invalid group parameters: {}", msg),
        }
    }
}

impl std::error::Error for GroupError {}

impl GroupError {
    /// Short tag used in run records.
    pub fn kind(&self) -> &'static str {
        match *self {
            Self::RngUnavailable => "RngUnavailable",
            Self::NotInvertible => "NotInvertible",
            Self::BadParams(_) => "BadParams",
        }
    }
}

/// 2048-bit safe prime of RFC 3526 group 14. Subgroup order is (p-1)/2,
/// generated by 2.
const MODP_2048_PRIME: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
    "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
    "9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

/// Prime-order multiplicative cyclic group: the order-q subgroup of (Z/pZ)*.
///
/// Group elements are multiplied modulo p; exponents live in the scalar field
/// modulo q. Keeping the two moduli behind separate operations is the whole
/// point of this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group {
    p: BigUint,
    q: BigUint,
    g: BigUint,
}

impl Group {
    /// Create a group from raw parameters, checking that q divides p-1 and
    /// that g generates a subgroup of order q.
    pub fn new(p: BigUint, q: BigUint, g: BigUint) -> Result<Self, GroupError> {
        let one = BigUint::one();
        if p <= BigUint::from(3u32) {
            return Err(GroupError::BadParams("modulus too small"));
        }
        if q <= one {
            return Err(GroupError::BadParams("subgroup order too small"));
        }
        if (&p - &one) % &q != BigUint::zero() {
            return Err(GroupError::BadParams("order does not divide p-1"));
        }
        if g <= one || g >= p {
            return Err(GroupError::BadParams("generator out of range"));
        }
        if !g.modpow(&q, &p).is_one() {
            return Err(GroupError::BadParams("generator order is not q"));
        }
        Ok(Group { p, q, g })
    }

    /// The 2048-bit MODP group of RFC 3526 with generator 2.
    pub fn modp_2048() -> Self {
        let p = BigUint::parse_bytes(MODP_2048_PRIME.as_bytes(), 16)
            .expect("MODP-2048 constant is valid hex");
        let q = (&p - BigUint::one()) >> 1;
        Group {
            p,
            q,
            g: BigUint::from(2u32),
        }
    }

    /// Group modulus p.
    pub fn modulus(&self) -> &BigUint {
        &self.p
    }

    /// Subgroup order q.
    pub fn order(&self) -> &Scalar {
        &self.q
    }

    /// Subgroup generator g.
    pub fn generator(&self) -> &GroupElement {
        &self.g
    }

    /// Number of bytes in the wire encoding of a scalar.
    pub fn scalar_width(&self) -> usize {
        ((self.q.bits() + 7) / 8) as usize
    }

    /// Uniform scalar in [0, q) from the OS randomness source, by rejection
    /// sampling over the minimal byte width.
    pub fn random_scalar(&self) -> Result<Scalar, GroupError> {
        let width = self.scalar_width();
        let excess = width as u64 * 8 - self.q.bits();
        let mask = 0xffu8 >> excess;
        let mut buf = vec![0u8; width];
        loop {
            OsRng
                .try_fill_bytes(&mut buf)
                .map_err(|_| GroupError::RngUnavailable)?;
            buf[0] &= mask;
            let candidate = BigUint::from_bytes_be(&buf);
            if candidate < self.q {
                return Ok(candidate);
            }
        }
    }

    /// a + b (mod q).
    pub fn add_scalar(&self, a: &Scalar, b: &Scalar) -> Scalar {
        (a + b) % &self.q
    }

    /// a - b (mod q).
    pub fn sub_scalar(&self, a: &Scalar, b: &Scalar) -> Scalar {
        ((a % &self.q) + &self.q - (b % &self.q)) % &self.q
    }

    /// a * b (mod q).
    pub fn mul_scalar(&self, a: &Scalar, b: &Scalar) -> Scalar {
        (a * b) % &self.q
    }

    /// a^-1 (mod q) via the extended Euclidean algorithm. Fails when
    /// gcd(a, q) != 1, which for prime q means a == 0.
    pub fn inv_scalar(&self, a: &Scalar) -> Result<Scalar, GroupError> {
        let a = a % &self.q;
        if a.is_zero() {
            return Err(GroupError::NotInvertible);
        }
        let q = BigInt::from(self.q.clone());
        let (gcd, x) = extended_gcd(&BigInt::from(a), &q);
        if !gcd.is_one() {
            return Err(GroupError::NotInvertible);
        }
        let x = ((x % &q) + &q) % &q;
        Ok(x.magnitude().clone())
    }

    /// base^exp (mod p), exponent reduced modulo q.
    pub fn pow(&self, base: &GroupElement, exp: &Scalar) -> GroupElement {
        base.modpow(&(exp % &self.q), &self.p)
    }

    /// Big-endian scalar bytes, zero-padded to the wire width.
    pub fn scalar_bytes(&self, s: &Scalar) -> Vec<u8> {
        let width = self.scalar_width();
        let raw = s.to_bytes_be();
        let mut out = vec![0u8; width];
        out[width - raw.len()..].copy_from_slice(&raw);
        out
    }

    /// Parse big-endian scalar bytes; None when the value is not below q.
    pub fn scalar_from_bytes(&self, bytes: &[u8]) -> Option<Scalar> {
        let value = BigUint::from_bytes_be(bytes);
        if value < self.q {
            Some(value)
        } else {
            None
        }
    }

    /// Lagrange coefficient for abscissa set `xs` at index `i`:
    /// lambda_i = prod_{j != i} (eval_at - x_j) * (x_i - x_j)^-1 (mod q).
    ///
    /// Duplicate abscissas make a factor of the denominator zero and surface
    /// as `NotInvertible`.
    pub fn lagrange_coefficient(
        &self,
        xs: &[Scalar],
        i: usize,
        eval_at: &Scalar,
    ) -> Result<Scalar, GroupError> {
        let mut num = Scalar::one();
        let mut den = Scalar::one();
        for (j, x_j) in xs.iter().enumerate() {
            if j == i {
                continue;
            }
            num = self.mul_scalar(&num, &self.sub_scalar(eval_at, x_j));
            den = self.mul_scalar(&den, &self.sub_scalar(&xs[i], x_j));
        }
        Ok(self.mul_scalar(&num, &self.inv_scalar(&den)?))
    }

    /// All Lagrange coefficients for the abscissa set.
    pub fn lagrange_coefficients(
        &self,
        xs: &[Scalar],
        eval_at: &Scalar,
    ) -> Result<Vec<Scalar>, GroupError> {
        (0..xs.len())
            .map(|i| self.lagrange_coefficient(xs, i, eval_at))
            .collect()
    }

    /// Clear-text Lagrange interpolation over the scalar field, used for
    /// verification against the protocol result.
    pub fn interpolate_clear(
        &self,
        points: &[(Scalar, Scalar)],
        eval_at: &Scalar,
    ) -> Result<Scalar, GroupError> {
        let xs: Vec<Scalar> = points.iter().map(|(x, _)| x.clone()).collect();
        let mut acc = Scalar::zero();
        for (i, (_, y)) in points.iter().enumerate() {
            let lambda = self.lagrange_coefficient(&xs, i, eval_at)?;
            acc = self.add_scalar(&acc, &self.mul_scalar(&lambda, y));
        }
        Ok(acc)
    }
}

/// Iterative extended Euclidean algorithm. Returns (gcd, x) with
/// a*x + b*y = gcd for some y.
fn extended_gcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt) {
    let (mut old_r, mut r) = (a.clone(), b.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    while !r.is_zero() {
        let quotient = &old_r / &r;
        let next_r = &old_r - &quotient * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &quotient * &s;
        old_s = std::mem::replace(&mut s, next_s);
    }
    (old_r, old_s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_group() -> Group {
        Group::new(
            BigUint::from(23u32),
            BigUint::from(11u32),
            BigUint::from(2u32),
        )
        .unwrap()
    }

    fn scalar(x: u32) -> Scalar {
        BigUint::from(x)
    }

    #[test]
    fn rejects_bad_params() {
        // 5 does not divide 22
        assert_eq!(
            Group::new(scalar(23), scalar(5), scalar(2)),
            Err(GroupError::BadParams("order does not divide p-1"))
        );
        // 5 has order 22, not 11
        assert_eq!(
            Group::new(scalar(23), scalar(11), scalar(5)),
            Err(GroupError::BadParams("generator order is not q"))
        );
        assert!(Group::new(scalar(23), scalar(11), scalar(1)).is_err());
    }

    #[test]
    fn modp_2048_is_well_formed() {
        let group = Group::modp_2048();
        assert_eq!(group.modulus().bits(), 2048);
        assert_eq!(group.order().bits(), 2047);
        assert_eq!(group.scalar_width(), 256);
        assert!(group
            .generator()
            .modpow(group.order(), group.modulus())
            .is_one());
    }

    #[test]
    fn scalar_arithmetic_wraps() {
        let group = toy_group();
        assert_eq!(group.add_scalar(&scalar(7), &scalar(8)), scalar(4));
        assert_eq!(group.sub_scalar(&scalar(3), &scalar(5)), scalar(9));
        assert_eq!(group.mul_scalar(&scalar(6), &scalar(6)), scalar(3));
    }

    #[test]
    fn inverse_round_trips() {
        let group = toy_group();
        for a in 1u32..11 {
            let inv = group.inv_scalar(&scalar(a)).unwrap();
            assert_eq!(group.mul_scalar(&scalar(a), &inv), scalar(1));
        }
        assert_eq!(
            group.inv_scalar(&scalar(0)),
            Err(GroupError::NotInvertible)
        );
        assert_eq!(
            group.inv_scalar(&scalar(11)),
            Err(GroupError::NotInvertible)
        );
    }

    #[test]
    fn pow_reduces_exponents_mod_q() {
        let group = toy_group();
        let g = group.generator();
        assert_eq!(group.pow(g, &scalar(12)), group.pow(g, &scalar(1)));
        // exponents summing to q multiply to the identity
        let product = group.pow(g, &scalar(5)) * group.pow(g, &scalar(6)) % group.modulus();
        assert!(product.is_one());
    }

    #[test]
    fn random_scalar_is_in_range() {
        let group = toy_group();
        for _ in 0..100 {
            assert!(group.random_scalar().unwrap() < scalar(11));
        }
    }

    #[test]
    fn lagrange_coefficients_match_known_values() {
        let group = toy_group();
        let xs = vec![scalar(1), scalar(2), scalar(3)];
        let lambdas = group.lagrange_coefficients(&xs, &scalar(0)).unwrap();
        assert_eq!(lambdas, vec![scalar(3), scalar(8), scalar(1)]);
    }

    #[test]
    fn duplicate_abscissas_are_not_invertible() {
        let group = toy_group();
        let xs = vec![scalar(1), scalar(1), scalar(2)];
        assert_eq!(
            group.lagrange_coefficients(&xs, &scalar(0)),
            Err(GroupError::NotInvertible)
        );
    }

    #[test]
    fn clear_interpolation_matches_hand_computation() {
        let group = toy_group();
        let points = vec![
            (scalar(1), scalar(4)),
            (scalar(2), scalar(5)),
            (scalar(3), scalar(6)),
        ];
        // 3*4 + 8*5 + 1*6 = 58 = 3 (mod 11)
        assert_eq!(
            group.interpolate_clear(&points, &scalar(0)).unwrap(),
            scalar(3)
        );
    }

    #[test]
    fn interpolation_recovers_polynomial_evaluation() {
        let group = Group::modp_2048();
        // f(x) = 5 + 7x + 11x^2 over the scalar field
        let f = |x: u64| scalar(5) + scalar(7) * x + scalar(11) * x * x;
        let points: Vec<_> = (1u64..=4).map(|x| (Scalar::from(x), f(x))).collect();
        for at in [0u64, 9] {
            assert_eq!(
                group
                    .interpolate_clear(&points, &Scalar::from(at))
                    .unwrap(),
                f(at)
            );
        }
    }

    #[test]
    fn scalar_bytes_round_trip() {
        let group = Group::modp_2048();
        let s = group.random_scalar().unwrap();
        let bytes = group.scalar_bytes(&s);
        assert_eq!(bytes.len(), 256);
        assert_eq!(group.scalar_from_bytes(&bytes), Some(s));
        assert_eq!(group.scalar_from_bytes(&group.order().to_bytes_be()), None);
    }
}
