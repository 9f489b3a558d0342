use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::{Data, DeriveInput, Fields, Ident, LitBool, LitStr, Type, parse_macro_input, spanned::Spanned};

/// Derives `changetrack::Record` plus a `<Name>Setters` trait with one
/// intercepting setter per writable field, implemented for `Tracked<Name>`.
#[proc_macro_derive(Record, attributes(record))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_record(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct RecordOptions {
    table: Option<String>,
}

#[derive(Default)]
struct FieldOptions {
    identity: bool,
    ignored: Option<bool>,
    readonly: bool,
    column: Option<String>,
}

struct RecordField {
    ident: Ident,
    name: String,
    ty: Type,
    options: FieldOptions,
}

fn expand_record(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = input.ident;
    let vis = input.vis;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.generics,
            "Record does not support generic structs",
        ));
    }

    let options = parse_record_options(&input.attrs)?;

    let data_struct = match input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Record can only be derived for structs",
            ));
        }
    };

    let named_fields = match data_struct.fields {
        Fields::Named(fields) => fields,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Record requires named fields",
            ));
        }
    };

    let mut fields = Vec::<RecordField>::new();
    for field in named_fields.named {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new(field.span(), "Record requires named fields"))?;
        let options = parse_field_options(&field.attrs)?;
        fields.push(RecordField {
            name: ident.unraw().to_string(),
            ident,
            ty: field.ty,
            options,
        });
    }

    let identity = resolve_identity(&struct_name, &fields)?;
    let type_name = struct_name.to_string();
    let table = options
        .table
        .unwrap_or_else(|| to_snake_case(&type_name));

    let descriptors = fields.iter().map(|field| {
        let name = &field.name;
        let column = field.options.column.clone().unwrap_or_else(|| name.clone());
        let ty = &field.ty;
        let ignored = match field.options.ignored {
            Some(flag) => quote! { ::core::option::Option::Some(#flag) },
            None => quote! { ::core::option::Option::None },
        };
        let settable = !field.options.readonly;
        quote! {
            ::changetrack::FieldDescriptor {
                name: #name,
                column: #column,
                sql_type: <#ty as ::changetrack::FieldValue>::SQL_TYPE,
                ignored: #ignored,
                settable: #settable,
            }
        }
    });

    let get_arms = fields.iter().map(|field| {
        let name = &field.name;
        let ident = &field.ident;
        let ty = &field.ty;
        quote! {
            #name => ::core::option::Option::Some(
                <#ty as ::changetrack::FieldValue>::to_value(&self.#ident)
            ),
        }
    });

    let set_arms = fields.iter().map(|field| {
        let name = &field.name;
        let ident = &field.ident;
        let ty = &field.ty;
        if field.options.readonly {
            let message = format!("{type_name}.{name} is read-only");
            quote! {
                #name => ::core::result::Result::Err(
                    ::changetrack::TrackError::UnsupportedShape(#message.to_string())
                ),
            }
        } else {
            quote! {
                #name => {
                    self.#ident = <#ty as ::changetrack::FieldValue>::from_value(value)?;
                    ::core::result::Result::Ok(())
                }
            }
        }
    });

    let setters_trait = format_ident!("{}Setters", struct_name);
    let writable: Vec<&RecordField> = fields
        .iter()
        .filter(|field| !field.options.readonly)
        .collect();

    let setter_sigs = writable.iter().map(|field| {
        let setter = format_ident!("set_{}", field.name);
        let ty = &field.ty;
        quote! { fn #setter(&mut self, value: #ty); }
    });

    let setter_impls = writable.iter().map(|field| {
        let setter = format_ident!("set_{}", field.name);
        let name = &field.name;
        let ident = &field.ident;
        let ty = &field.ty;
        quote! {
            fn #setter(&mut self, value: #ty) {
                let next = <#ty as ::changetrack::FieldValue>::to_value(&value);
                self.intercept(#name, next, move |record| record.#ident = value);
            }
        }
    });

    let field_count = fields.len();

    Ok(quote! {
        impl ::changetrack::Record for #struct_name {
            fn descriptor() -> &'static ::changetrack::RecordDescriptor {
                static FIELDS: [::changetrack::FieldDescriptor; #field_count] = [
                    #(#descriptors),*
                ];
                static DESCRIPTOR: ::changetrack::RecordDescriptor = ::changetrack::RecordDescriptor {
                    type_name: #type_name,
                    table: #table,
                    identity: #identity,
                    fields: &FIELDS,
                };
                &DESCRIPTOR
            }

            fn get(&self, field: &str) -> ::core::option::Option<::changetrack::Value> {
                match field {
                    #(#get_arms)*
                    _ => ::core::option::Option::None,
                }
            }

            fn set(
                &mut self,
                field: &str,
                value: ::changetrack::Value,
            ) -> ::changetrack::Result<()> {
                match field {
                    #(#set_arms)*
                    _ => ::core::result::Result::Err(::changetrack::TrackError::FieldNotFound {
                        record: #type_name.to_string(),
                        field: field.to_string(),
                    }),
                }
            }
        }

        /// Intercepting setters generated by `#[derive(Record)]`.
        #[allow(dead_code)]
        #vis trait #setters_trait {
            #(#setter_sigs)*
        }

        impl #setters_trait for ::changetrack::Tracked<#struct_name> {
            #(#setter_impls)*
        }
    })
}

fn resolve_identity(struct_name: &Ident, fields: &[RecordField]) -> syn::Result<String> {
    let mut marked = fields.iter().filter(|field| field.options.identity);
    if let Some(first) = marked.next() {
        if let Some(second) = marked.next() {
            return Err(syn::Error::new(
                second.ident.span(),
                "Only one field can be marked #[record(identity)]",
            ));
        }
        return Ok(first.name.clone());
    }

    fields
        .iter()
        .find(|field| field.name == "id")
        .map(|field| field.name.clone())
        .ok_or_else(|| {
            syn::Error::new(
                struct_name.span(),
                "Record needs an identity: add an `id` field or mark one with #[record(identity)]",
            )
        })
}

fn parse_record_options(attrs: &[syn::Attribute]) -> syn::Result<RecordOptions> {
    let mut options = RecordOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("record") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                if lit.value().trim().is_empty() {
                    return Err(meta.error("table name cannot be empty"));
                }
                options.table = Some(lit.value());
                return Ok(());
            }

            Err(meta.error("Unsupported #[record(...)] option on struct. Supported: table = \"...\""))
        })?;
    }

    Ok(options)
}

fn parse_field_options(attrs: &[syn::Attribute]) -> syn::Result<FieldOptions> {
    let mut options = FieldOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("record") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("identity") {
                options.identity = true;
                return Ok(());
            }

            if meta.path.is_ident("ignore") {
                let flag = if meta.input.peek(syn::Token![=]) {
                    let lit: LitBool = meta.value()?.parse()?;
                    lit.value
                } else {
                    true
                };
                options.ignored = Some(flag);
                return Ok(());
            }

            if meta.path.is_ident("readonly") {
                options.readonly = true;
                return Ok(());
            }

            if meta.path.is_ident("column") {
                let lit: LitStr = meta.value()?.parse()?;
                if lit.value().trim().is_empty() {
                    return Err(meta.error("column name cannot be empty"));
                }
                options.column = Some(lit.value());
                return Ok(());
            }

            Err(meta.error(
                "Unsupported #[record(...)] option. Supported: identity, ignore, ignore = <bool>, readonly, column = \"...\"",
            ))
        })?;
    }

    if options.identity && options.ignored == Some(true) {
        return Err(syn::Error::new(
            attrs
                .iter()
                .find(|attr| attr.path().is_ident("record"))
                .map(|attr| attr.span())
                .unwrap_or_else(proc_macro2::Span::call_site),
            "identity field cannot be ignored",
        ));
    }

    Ok(options)
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}
