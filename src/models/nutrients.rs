use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Nutrient {
    Nitrogen,
    Phosphorus,
    Potassium,
}

impl Nutrient {
    pub const ALL: [Nutrient; 3] = [Nutrient::Nitrogen, Nutrient::Phosphorus, Nutrient::Potassium];

    pub fn as_str(&self) -> &'static str {
        match self {
            Nutrient::Nitrogen => "Nitrogen",
            Nutrient::Phosphorus => "Phosphorus",
            Nutrient::Potassium => "Potassium",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Nutrient::Nitrogen => "N",
            Nutrient::Phosphorus => "P",
            Nutrient::Potassium => "K",
        }
    }
}

impl std::fmt::Display for Nutrient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// N/P/K amounts in kg/ha.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutrientLevels {
    #[serde(rename = "N")]
    pub n: f64,
    #[serde(rename = "P")]
    pub p: f64,
    #[serde(rename = "K")]
    pub k: f64,
}

impl NutrientLevels {
    pub const ZERO: NutrientLevels = NutrientLevels {
        n: 0.0,
        p: 0.0,
        k: 0.0,
    };

    pub fn new(n: f64, p: f64, k: f64) -> Self {
        Self { n, p, k }
    }

    pub fn get(&self, nutrient: Nutrient) -> f64 {
        match nutrient {
            Nutrient::Nitrogen => self.n,
            Nutrient::Phosphorus => self.p,
            Nutrient::Potassium => self.k,
        }
    }

    pub fn from_fn(mut f: impl FnMut(Nutrient) -> f64) -> Self {
        Self {
            n: f(Nutrient::Nitrogen),
            p: f(Nutrient::Phosphorus),
            k: f(Nutrient::Potassium),
        }
    }

    pub fn map(&self, mut f: impl FnMut(f64) -> f64) -> Self {
        Self {
            n: f(self.n),
            p: f(self.p),
            k: f(self.k),
        }
    }

    pub fn zip_with(&self, other: &Self, mut f: impl FnMut(f64, f64) -> f64) -> Self {
        Self {
            n: f(self.n, other.n),
            p: f(self.p, other.p),
            k: f(self.k, other.k),
        }
    }

    pub fn add(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a + b)
    }

    /// Subtraction floored at zero.
    pub fn saturating_sub(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| (a - b).max(0.0))
    }

    pub fn scale(&self, factor: f64) -> Self {
        self.map(|v| v * factor)
    }

    pub fn is_valid(&self) -> bool {
        Nutrient::ALL
            .iter()
            .all(|n| self.get(*n).is_finite() && self.get(*n) >= 0.0)
    }
}

impl std::fmt::Display for NutrientLevels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "N={:.2} P={:.2} K={:.2}", self.n, self.p, self.k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_sub_floors_at_zero() {
        let a = NutrientLevels::new(10.0, 5.0, 1.0);
        let b = NutrientLevels::new(4.0, 8.0, 1.0);
        assert_eq!(a.saturating_sub(&b), NutrientLevels::new(6.0, 0.0, 0.0));
    }

    #[test]
    fn validity_rejects_negative_and_nan() {
        assert!(NutrientLevels::new(90.0, 42.0, 43.0).is_valid());
        assert!(NutrientLevels::ZERO.is_valid());
        assert!(!NutrientLevels::new(-1.0, 0.0, 0.0).is_valid());
        assert!(!NutrientLevels::new(0.0, f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn serializes_with_symbol_keys() {
        let json = serde_json::to_string(&NutrientLevels::new(1.0, 2.0, 3.0)).unwrap();
        assert_eq!(json, r#"{"N":1.0,"P":2.0,"K":3.0}"#);
    }
}
