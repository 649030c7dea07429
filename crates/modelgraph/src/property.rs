//! Scalar property nodes.
//!
//! A property is a scalar-valued member of a type node. Each of its facets
//! carries an independent configuration source; setters follow the uniform
//! precedence contract (`can_set_*` is a pure predicate, `set_*` returns the
//! committed value or `None` on silent rejection, and domain-invariant
//! violations are hard errors regardless of source).
//!
//! The interplay between nullability and key membership is handled by the
//! model, which owns the keys; the setters here validate only node-local
//! invariants.

use std::sync::OnceLock;

use crate::annotations::{AnnotationBag, AnnotationChange};
use crate::error::Error;
use crate::facet::{
    FacetKey, FacetMap, FacetValue, SaveBehavior, ValueComparer, ValueConverter, ValueGenerated,
};
use crate::mapping::{TypeMapping, TypeMappingProvider};
use crate::source::ConfigurationSource;
use crate::types::TypeRef;
use crate::value::Value;

/// A scalar-valued member of a type node.
#[derive(Debug)]
pub struct Property {
    name: String,
    declaring_type: String,
    clr_type: TypeRef,
    member: Option<String>,
    type_source: Option<ConfigurationSource>,
    source: ConfigurationSource,
    facets: FacetMap,
    annotations: AnnotationBag,
    mapping: OnceLock<TypeMapping>,
}

impl Property {
    pub(crate) fn new(
        name: String,
        declaring_type: String,
        clr_type: TypeRef,
        member: Option<String>,
        type_source: Option<ConfigurationSource>,
        source: ConfigurationSource,
    ) -> Self {
        Self {
            name,
            declaring_type,
            clr_type,
            member,
            type_source,
            source,
            facets: FacetMap::new(),
            annotations: AnnotationBag::new(),
            mapping: OnceLock::new(),
        }
    }

    /// Property name, unique within the declaring type's hierarchy.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display name of the declaring type.
    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    /// The property's runtime type. Fixed at creation.
    pub fn clr_type(&self) -> &TypeRef {
        &self.clr_type
    }

    /// The backing runtime member this property is bound to, if any.
    pub fn member(&self) -> Option<&str> {
        self.member.as_deref()
    }

    /// The source that established the property's runtime type, if it was
    /// configured rather than taken from the backing member.
    pub fn type_source(&self) -> Option<ConfigurationSource> {
        self.type_source
    }

    /// The source that established the property itself.
    pub fn source(&self) -> ConfigurationSource {
        self.source
    }

    /// The property's facet map.
    pub fn facets(&self) -> &FacetMap {
        &self.facets
    }

    /// The property's annotation bag.
    pub fn annotations(&self) -> &AnnotationBag {
        &self.annotations
    }

    /// Set an annotation on the property, gated by source precedence.
    pub(crate) fn set_annotation(
        &mut self,
        name: impl Into<String>,
        value: Option<Value>,
        source: ConfigurationSource,
    ) -> Option<AnnotationChange> {
        self.annotations.set_or_remove(name, value, source)
    }

    // --- nullability ---

    /// Whether the property may hold null. Defaults to the runtime type's
    /// nullability when unconfigured.
    pub fn is_nullable(&self) -> bool {
        match self.facets.get(FacetKey::Nullable) {
            Some(FacetValue::Bool(v)) => *v,
            _ => self.clr_type.is_nullable(),
        }
    }

    /// Check whether `source` may set nullability to `value`.
    pub fn can_set_nullable(&self, value: bool, source: ConfigurationSource) -> bool {
        (!value || self.clr_type.is_nullable())
            && self
                .facets
                .can_set(FacetKey::Nullable, &FacetValue::Bool(value), source)
    }

    /// Set nullability. Making a property of a non-nullable runtime type
    /// nullable is a hard error regardless of source.
    ///
    /// Key membership is not consulted here; use the model's property
    /// mutators on key-bearing entity types.
    pub(crate) fn set_nullable(
        &mut self,
        value: bool,
        source: ConfigurationSource,
    ) -> Result<Option<bool>, Error> {
        if value && !self.clr_type.is_nullable() {
            return Err(Error::CannotBeNullable {
                property: self.name.clone(),
                entity: self.declaring_type.clone(),
                clr_type: self.clr_type.name().to_string(),
            });
        }
        Ok(self
            .facets
            .set(FacetKey::Nullable, FacetValue::Bool(value), source)
            .map(|_| value))
    }

    // --- simple boolean facets ---

    /// Whether the property is a concurrency token.
    pub fn is_concurrency_token(&self) -> bool {
        matches!(
            self.facets.get(FacetKey::ConcurrencyToken),
            Some(FacetValue::Bool(true))
        )
    }

    /// Check whether `source` may set the concurrency-token flag.
    pub fn can_set_concurrency_token(&self, value: bool, source: ConfigurationSource) -> bool {
        self.facets
            .can_set(FacetKey::ConcurrencyToken, &FacetValue::Bool(value), source)
    }

    pub(crate) fn set_concurrency_token(
        &mut self,
        value: bool,
        source: ConfigurationSource,
    ) -> Option<bool> {
        self.facets
            .set(FacetKey::ConcurrencyToken, FacetValue::Bool(value), source)
            .map(|_| value)
    }

    /// Whether string data is Unicode. `None` when unconfigured.
    pub fn is_unicode(&self) -> Option<bool> {
        match self.facets.get(FacetKey::Unicode) {
            Some(FacetValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Check whether `source` may set the unicode flag.
    pub fn can_set_unicode(&self, value: bool, source: ConfigurationSource) -> bool {
        self.facets
            .can_set(FacetKey::Unicode, &FacetValue::Bool(value), source)
    }

    pub(crate) fn set_unicode(
        &mut self,
        value: bool,
        source: ConfigurationSource,
    ) -> Option<bool> {
        self.facets
            .set(FacetKey::Unicode, FacetValue::Bool(value), source)
            .map(|_| value)
    }

    // --- value generation and save behavior ---

    /// When the store generates this property's value.
    pub fn value_generated(&self) -> ValueGenerated {
        match self.facets.get(FacetKey::ValueGenerated) {
            Some(FacetValue::Generated(v)) => *v,
            _ => ValueGenerated::Never,
        }
    }

    /// Check whether `source` may set the value-generation strategy.
    pub fn can_set_value_generated(
        &self,
        value: ValueGenerated,
        source: ConfigurationSource,
    ) -> bool {
        self.facets
            .can_set(FacetKey::ValueGenerated, &FacetValue::Generated(value), source)
    }

    pub(crate) fn set_value_generated(
        &mut self,
        value: ValueGenerated,
        source: ConfigurationSource,
    ) -> Option<ValueGenerated> {
        self.facets
            .set(FacetKey::ValueGenerated, FacetValue::Generated(value), source)
            .map(|_| value)
    }

    /// Save behavior before the record exists.
    pub fn before_save(&self) -> SaveBehavior {
        match self.facets.get(FacetKey::BeforeSave) {
            Some(FacetValue::Save(v)) => *v,
            _ => SaveBehavior::Save,
        }
    }

    /// Check whether `source` may set the before-save behavior.
    pub fn can_set_before_save(&self, value: SaveBehavior, source: ConfigurationSource) -> bool {
        self.facets
            .can_set(FacetKey::BeforeSave, &FacetValue::Save(value), source)
    }

    pub(crate) fn set_before_save(
        &mut self,
        value: SaveBehavior,
        source: ConfigurationSource,
    ) -> Option<SaveBehavior> {
        self.facets
            .set(FacetKey::BeforeSave, FacetValue::Save(value), source)
            .map(|_| value)
    }

    /// Save behavior after the record exists.
    pub fn after_save(&self) -> SaveBehavior {
        match self.facets.get(FacetKey::AfterSave) {
            Some(FacetValue::Save(v)) => *v,
            _ => SaveBehavior::Save,
        }
    }

    /// Check whether `source` may set the after-save behavior.
    pub fn can_set_after_save(&self, value: SaveBehavior, source: ConfigurationSource) -> bool {
        self.facets
            .can_set(FacetKey::AfterSave, &FacetValue::Save(value), source)
    }

    pub(crate) fn set_after_save(
        &mut self,
        value: SaveBehavior,
        source: ConfigurationSource,
    ) -> Option<SaveBehavior> {
        self.facets
            .set(FacetKey::AfterSave, FacetValue::Save(value), source)
            .map(|_| value)
    }

    // --- numeric facets: range checks throw regardless of source ---

    /// Maximum length for string/binary data. `-1` means unbounded.
    pub fn max_length(&self) -> Option<i64> {
        match self.facets.get(FacetKey::MaxLength) {
            Some(FacetValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Check whether `source` may set the max length. Does not range-check.
    pub fn can_set_max_length(&self, value: i64, source: ConfigurationSource) -> bool {
        self.facets
            .can_set(FacetKey::MaxLength, &FacetValue::Int(value), source)
    }

    pub(crate) fn set_max_length(
        &mut self,
        value: i64,
        source: ConfigurationSource,
    ) -> Result<Option<i64>, Error> {
        if value < -1 {
            return Err(Error::FacetOutOfRange {
                facet: FacetKey::MaxLength.to_string(),
                value,
                requirement: "must be -1 (unbounded) or non-negative",
            });
        }
        Ok(self
            .facets
            .set(FacetKey::MaxLength, FacetValue::Int(value), source)
            .map(|_| value))
    }

    /// Total number of digits for decimal data.
    pub fn precision(&self) -> Option<i64> {
        match self.facets.get(FacetKey::Precision) {
            Some(FacetValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Check whether `source` may set the precision. Does not range-check.
    pub fn can_set_precision(&self, value: i64, source: ConfigurationSource) -> bool {
        self.facets
            .can_set(FacetKey::Precision, &FacetValue::Int(value), source)
    }

    pub(crate) fn set_precision(
        &mut self,
        value: i64,
        source: ConfigurationSource,
    ) -> Result<Option<i64>, Error> {
        if value < 0 {
            return Err(Error::FacetOutOfRange {
                facet: FacetKey::Precision.to_string(),
                value,
                requirement: "must be non-negative",
            });
        }
        Ok(self
            .facets
            .set(FacetKey::Precision, FacetValue::Int(value), source)
            .map(|_| value))
    }

    /// Digits after the decimal point for decimal data.
    pub fn scale(&self) -> Option<i64> {
        match self.facets.get(FacetKey::Scale) {
            Some(FacetValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Check whether `source` may set the scale. Does not range-check.
    pub fn can_set_scale(&self, value: i64, source: ConfigurationSource) -> bool {
        self.facets
            .can_set(FacetKey::Scale, &FacetValue::Int(value), source)
    }

    pub(crate) fn set_scale(
        &mut self,
        value: i64,
        source: ConfigurationSource,
    ) -> Result<Option<i64>, Error> {
        if value < 0 {
            return Err(Error::FacetOutOfRange {
                facet: FacetKey::Scale.to_string(),
                value,
                requirement: "must be non-negative",
            });
        }
        Ok(self
            .facets
            .set(FacetKey::Scale, FacetValue::Int(value), source)
            .map(|_| value))
    }

    // --- sentinel ---

    /// The configured "unset" sentinel value.
    pub fn sentinel(&self) -> Option<&Value> {
        match self.facets.get(FacetKey::Sentinel) {
            Some(FacetValue::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Check whether `source` may set the sentinel. Does not type-check.
    pub fn can_set_sentinel(&self, value: &Value, source: ConfigurationSource) -> bool {
        self.facets.can_set(
            FacetKey::Sentinel,
            &FacetValue::Value(value.clone()),
            source,
        )
    }

    pub(crate) fn set_sentinel(
        &mut self,
        value: Value,
        source: ConfigurationSource,
    ) -> Result<Option<Value>, Error> {
        if !value.fits(&self.clr_type) {
            return Err(Error::SentinelTypeMismatch {
                property: self.name.clone(),
                clr_type: self.clr_type.name().to_string(),
                value,
            });
        }
        Ok(self
            .facets
            .set(FacetKey::Sentinel, FacetValue::Value(value.clone()), source)
            .map(|_| value))
    }

    // --- conversion ---

    /// The converter declared directly on this property.
    pub fn converter(&self) -> Option<&ValueConverter> {
        match self.facets.get(FacetKey::Converter) {
            Some(FacetValue::Converter(v)) => Some(v),
            _ => None,
        }
    }

    /// Check whether `source` may set the converter. Does not type-check.
    pub fn can_set_converter(&self, value: &ValueConverter, source: ConfigurationSource) -> bool {
        self.facets.can_set(
            FacetKey::Converter,
            &FacetValue::Converter(value.clone()),
            source,
        )
    }

    pub(crate) fn set_converter(
        &mut self,
        value: ValueConverter,
        source: ConfigurationSource,
    ) -> Result<Option<ValueConverter>, Error> {
        let model_side = &value.model_type;
        let own = self.clr_type.underlying().unwrap_or(&self.clr_type);
        if model_side != &self.clr_type && model_side != own {
            return Err(Error::ConverterTypeMismatch {
                property: self.name.clone(),
                clr_type: self.clr_type.name().to_string(),
                converter: value.name.clone(),
                converter_model_type: model_side.name().to_string(),
            });
        }
        Ok(self
            .facets
            .set(
                FacetKey::Converter,
                FacetValue::Converter(value.clone()),
                source,
            )
            .map(|_| value))
    }

    /// The provider-side runtime type declared directly on this property.
    pub fn provider_type(&self) -> Option<&TypeRef> {
        match self.facets.get(FacetKey::ProviderType) {
            Some(FacetValue::Type(v)) => Some(v),
            _ => None,
        }
    }

    /// Check whether `source` may set the provider type.
    pub fn can_set_provider_type(&self, value: &TypeRef, source: ConfigurationSource) -> bool {
        self.facets
            .can_set(FacetKey::ProviderType, &FacetValue::Type(value.clone()), source)
    }

    pub(crate) fn set_provider_type(
        &mut self,
        value: TypeRef,
        source: ConfigurationSource,
    ) -> Option<TypeRef> {
        self.facets
            .set(FacetKey::ProviderType, FacetValue::Type(value.clone()), source)
            .map(|_| value)
    }

    // --- comparers ---

    /// The model-side value comparer.
    pub fn comparer(&self) -> Option<&ValueComparer> {
        match self.facets.get(FacetKey::Comparer) {
            Some(FacetValue::Comparer(v)) => Some(v),
            _ => None,
        }
    }

    /// Check whether `source` may set the comparer.
    pub fn can_set_comparer(&self, value: &ValueComparer, source: ConfigurationSource) -> bool {
        self.facets.can_set(
            FacetKey::Comparer,
            &FacetValue::Comparer(value.clone()),
            source,
        )
    }

    pub(crate) fn set_comparer(
        &mut self,
        value: ValueComparer,
        source: ConfigurationSource,
    ) -> Option<ValueComparer> {
        self.facets
            .set(FacetKey::Comparer, FacetValue::Comparer(value.clone()), source)
            .map(|_| value)
    }

    /// The provider-side value comparer.
    pub fn provider_comparer(&self) -> Option<&ValueComparer> {
        match self.facets.get(FacetKey::ProviderComparer) {
            Some(FacetValue::Comparer(v)) => Some(v),
            _ => None,
        }
    }

    /// Check whether `source` may set the provider comparer.
    pub fn can_set_provider_comparer(
        &self,
        value: &ValueComparer,
        source: ConfigurationSource,
    ) -> bool {
        self.facets.can_set(
            FacetKey::ProviderComparer,
            &FacetValue::Comparer(value.clone()),
            source,
        )
    }

    pub(crate) fn set_provider_comparer(
        &mut self,
        value: ValueComparer,
        source: ConfigurationSource,
    ) -> Option<ValueComparer> {
        self.facets
            .set(
                FacetKey::ProviderComparer,
                FacetValue::Comparer(value.clone()),
                source,
            )
            .map(|_| value)
    }

    // --- backing field ---

    /// The backing-field binding.
    pub fn field_binding(&self) -> Option<&str> {
        match self.facets.get(FacetKey::FieldBinding) {
            Some(FacetValue::Field(v)) => Some(v),
            _ => None,
        }
    }

    /// Check whether `source` may set the backing-field binding.
    pub fn can_set_field_binding(&self, value: &str, source: ConfigurationSource) -> bool {
        self.facets.can_set(
            FacetKey::FieldBinding,
            &FacetValue::Field(value.to_string()),
            source,
        )
    }

    pub(crate) fn set_field_binding(
        &mut self,
        value: String,
        source: ConfigurationSource,
    ) -> Option<String> {
        self.facets
            .set(FacetKey::FieldBinding, FacetValue::Field(value.clone()), source)
            .map(|_| value)
    }

    /// The physical representation of this property, resolved lazily through
    /// the provider. The first computed mapping is published and reused;
    /// concurrent first-use computations discard losers.
    pub fn type_mapping(&self, provider: &dyn TypeMappingProvider) -> &TypeMapping {
        self.mapping
            .get_or_init(|| provider.map(&self.clr_type, &self.facets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn property(ty: TypeRef) -> Property {
        Property::new(
            "Total".to_string(),
            "Order".to_string(),
            ty,
            None,
            None,
            ConfigurationSource::Explicit,
        )
    }

    #[test]
    fn test_nullable_defaults_to_clr_type() {
        assert!(!property(TypeRef::int32()).is_nullable());
        assert!(property(TypeRef::optional(TypeRef::int32())).is_nullable());
        assert!(property(TypeRef::string()).is_nullable());
    }

    #[test]
    fn test_nullable_rejected_below_recorded_source() {
        let mut prop = property(TypeRef::optional(TypeRef::int32()));
        prop.set_nullable(false, ConfigurationSource::Explicit).unwrap();

        let outcome = prop
            .set_nullable(true, ConfigurationSource::Convention)
            .unwrap();
        assert!(outcome.is_none());
        assert!(!prop.is_nullable());
    }

    #[test]
    fn test_non_nullable_type_hard_error() {
        let mut prop = property(TypeRef::int32());
        let err = prop.set_nullable(true, ConfigurationSource::Explicit);
        assert!(matches!(err, Err(Error::CannotBeNullable { .. })));
        // Convention is rejected the same way: a domain invariant, not an
        // authority conflict.
        let err = prop.set_nullable(true, ConfigurationSource::Convention);
        assert!(matches!(err, Err(Error::CannotBeNullable { .. })));
    }

    #[test]
    fn test_max_length_range() {
        let mut prop = property(TypeRef::string());
        assert!(matches!(
            prop.set_max_length(-2, ConfigurationSource::Explicit),
            Err(Error::FacetOutOfRange { .. })
        ));
        assert_eq!(
            prop.set_max_length(-1, ConfigurationSource::Convention).unwrap(),
            Some(-1)
        );
        assert_eq!(
            prop.set_max_length(128, ConfigurationSource::Explicit).unwrap(),
            Some(128)
        );
        assert_eq!(prop.max_length(), Some(128));
    }

    #[test]
    fn test_precision_scale_range() {
        let mut prop = property(TypeRef::named("Decimal"));
        assert!(matches!(
            prop.set_precision(-1, ConfigurationSource::Explicit),
            Err(Error::FacetOutOfRange { .. })
        ));
        assert!(matches!(
            prop.set_scale(-1, ConfigurationSource::Explicit),
            Err(Error::FacetOutOfRange { .. })
        ));
        prop.set_precision(18, ConfigurationSource::DataAnnotation).unwrap();
        prop.set_scale(2, ConfigurationSource::DataAnnotation).unwrap();
        assert_eq!(prop.precision(), Some(18));
        assert_eq!(prop.scale(), Some(2));
    }

    #[test]
    fn test_sentinel_must_fit_type() {
        let mut prop = property(TypeRef::int32());
        assert!(matches!(
            prop.set_sentinel(Value::String("unset".into()), ConfigurationSource::Explicit),
            Err(Error::SentinelTypeMismatch { .. })
        ));
        let committed = prop
            .set_sentinel(Value::Int(-1), ConfigurationSource::Convention)
            .unwrap();
        assert_eq!(committed, Some(Value::Int(-1)));
        assert_eq!(prop.sentinel(), Some(&Value::Int(-1)));
    }

    #[test]
    fn test_converter_model_side_must_match() {
        let mut prop = property(TypeRef::named("Money"));
        let bad = ValueConverter::new("string_to_int", TypeRef::string(), TypeRef::int64());
        assert!(matches!(
            prop.set_converter(bad, ConfigurationSource::Explicit),
            Err(Error::ConverterTypeMismatch { .. })
        ));

        let good = ValueConverter::new("money_to_i64", TypeRef::named("Money"), TypeRef::int64());
        let committed = prop
            .set_converter(good.clone(), ConfigurationSource::DataAnnotation)
            .unwrap();
        assert_eq!(committed, Some(good.clone()));
        assert_eq!(prop.converter(), Some(&good));
    }

    #[test]
    fn test_can_set_is_pure() {
        let mut prop = property(TypeRef::string());
        prop.set_unicode(true, ConfigurationSource::Explicit);

        assert!(!prop.can_set_unicode(false, ConfigurationSource::Convention));
        assert!(prop.can_set_unicode(true, ConfigurationSource::Convention));
        // The probe changed nothing.
        assert_eq!(prop.is_unicode(), Some(true));
    }

}
