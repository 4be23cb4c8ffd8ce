use crate::domain::numeric::Numeric;
use crate::error::StoreResult;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// A nullable numeric column of a fact table.
pub trait Metric: Copy + Ord + Send + Sync + 'static {
    const ALL: &'static [Self];

    fn column(self) -> &'static str;

    fn numeric(self) -> Numeric;
}

/// Truncates every reading onto its column's grid.
pub(crate) fn fit_metrics<M: Metric>(
    metrics: &BTreeMap<M, Decimal>,
) -> StoreResult<BTreeMap<M, Decimal>> {
    metrics
        .iter()
        .map(|(m, v)| Ok((*m, m.numeric().fit(m.column(), *v)?)))
        .collect()
}

/// Declares a metric enum whose serialized form is its column name.
macro_rules! metric_set {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $variant:ident => ($column:literal, $precision:literal, $scale:literal), )+
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(try_from = "String", into = "&'static str")]
        pub enum $name {
            $( $variant, )+
        }

        impl $crate::domain::metric::Metric for $name {
            const ALL: &'static [Self] = &[ $( $name::$variant, )+ ];

            fn column(self) -> &'static str {
                match self {
                    $( $name::$variant => $column, )+
                }
            }

            fn numeric(self) -> $crate::domain::numeric::Numeric {
                match self {
                    $( $name::$variant => $crate::domain::numeric::Numeric::new($precision, $scale), )+
                }
            }
        }

        impl From<$name> for &'static str {
            fn from(m: $name) -> Self {
                $crate::domain::metric::Metric::column(m)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$name as $crate::domain::metric::Metric>::ALL
                    .iter()
                    .copied()
                    .find(|m| $crate::domain::metric::Metric::column(*m) == s)
                    .ok_or_else(|| {
                        $crate::error::StoreError::InvalidInput(format!(
                            "unknown {} `{s}`",
                            stringify!($name)
                        ))
                    })
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::error::StoreError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str($crate::domain::metric::Metric::column(*self))
            }
        }
    };
}

pub(crate) use metric_set;
