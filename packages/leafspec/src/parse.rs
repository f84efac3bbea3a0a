use crate::{Error, Field, FlagSpec, Register};

/// Parses a [selector string][crate] into a [`FlagSpec`].
///
/// All equivalent surface forms of the same selector yield an identical result.
///
/// See [package-level documentation][crate] for the accepted notation.
pub fn parse(spec: &str) -> crate::Result<FlagSpec> {
    let spec = spec.trim();

    if spec.is_empty() {
        return Err(Error::new(
            spec.to_string(),
            "selector string is empty".to_string(),
        ));
    }

    let (selector, register_part) = split_selector(spec)?;
    let (leaf, subleaf) = parse_selector(selector)?;
    let (register, field) = parse_register_part(register_part)?;

    Ok(FlagSpec {
        leaf,
        subleaf,
        register,
        field,
    })
}

/// Splits at the `:` separating the selector from the register reference.
///
/// A `:` inside parentheses or brackets belongs to the selector or to a bit
/// range and does not count.
fn split_selector(spec: &str) -> crate::Result<(&str, &str)> {
    let mut depth = 0_u32;

    for (index, c) in spec.char_indices() {
        match c {
            '(' | '[' => depth = depth.saturating_add(1),
            ')' | ']' => depth = depth.saturating_sub(1),
            ':' if depth == 0 => {
                let (selector, rest) = spec.split_at(index);
                // The separator is a single ASCII byte.
                return Ok((selector, &rest[1..]));
            }
            _ => {}
        }
    }

    Err(Error::new(
        spec.to_string(),
        "expected ':' separating the leaf selector from the register".to_string(),
    ))
}

fn parse_selector(selector: &str) -> crate::Result<(u32, u32)> {
    let selector = selector.trim();

    if let Some(inner) = selector.strip_prefix('(') {
        let inner = inner.strip_suffix(')').ok_or_else(|| {
            Error::new(
                selector.to_string(),
                "parenthesized selector is missing the closing ')'".to_string(),
            )
        })?;

        return parse_parenthesized_selector(inner);
    }

    if let Some((leaf, subleaf)) = selector.split_once('.') {
        return Ok((parse_number(leaf)?, parse_number(subleaf)?));
    }

    Ok((parse_number(selector)?, 0))
}

fn parse_parenthesized_selector(inner: &str) -> crate::Result<(u32, u32)> {
    let mut leaf = None;
    let mut subleaf = 0;

    for part in inner.split(',') {
        let (key, value) = part.split_once('=').ok_or_else(|| {
            Error::new(
                part.trim().to_string(),
                "expected an EAX=value or ECX=value assignment".to_string(),
            )
        })?;

        match key.trim().to_ascii_lowercase().as_str() {
            "eax" => leaf = Some(parse_number(value)?),
            "ecx" => subleaf = parse_number(value)?,
            _ => {
                return Err(Error::new(
                    key.trim().to_string(),
                    "only EAX and ECX may be assigned in a selector".to_string(),
                ));
            }
        }
    }

    let leaf = leaf.ok_or_else(|| {
        Error::new(
            inner.to_string(),
            "parenthesized selector must assign EAX".to_string(),
        )
    })?;

    Ok((leaf, subleaf))
}

fn parse_register_part(part: &str) -> crate::Result<(Register, Field)> {
    let part = part.trim();

    let boundary = part.find(['.', '[', '(']).unwrap_or(part.len());
    let (name, rest) = part.split_at(boundary);

    let register = match name.trim().to_ascii_lowercase().as_str() {
        "eax" => Register::Eax,
        "ebx" => Register::Ebx,
        "ecx" => Register::Ecx,
        "edx" => Register::Edx,
        _ => {
            return Err(Error::new(
                name.trim().to_string(),
                "expected one of the registers eax, ebx, ecx or edx".to_string(),
            ));
        }
    };

    Ok((register, parse_field(rest.trim())?))
}

fn parse_field(field: &str) -> crate::Result<Field> {
    if field.is_empty() {
        return Ok(Field::Whole);
    }

    if let Some(name) = field.strip_prefix('.') {
        return parse_named_field(name);
    }

    if let Some(inner) = field.strip_prefix('[') {
        let inner = inner.strip_suffix(']').ok_or_else(|| {
            Error::new(
                field.to_string(),
                "bit field is missing the closing ']'".to_string(),
            )
        })?;

        return parse_bits(inner);
    }

    if let Some(inner) = field.strip_prefix('(') {
        let inner = inner.strip_suffix(')').ok_or_else(|| {
            Error::new(
                field.to_string(),
                "bit field is missing the closing ')'".to_string(),
            )
        })?;

        let bit = parse_number(inner)?;
        return single_bit(bit);
    }

    Err(Error::new(
        field.to_string(),
        "expected a '.name', '[bits]' or '(bit)' field reference".to_string(),
    ))
}

fn parse_named_field(name: &str) -> crate::Result<Field> {
    // Vendor documentation often echoes the bit position after the flag name,
    // e.g. `sgx[bit 2]`. The name is authoritative, so a well-formed bit
    // annotation is validated and then discarded.
    let name = if let Some(boundary) = name.find('[') {
        let annotation = &name[boundary..];
        parse_field(annotation)?;
        &name[..boundary]
    } else {
        name
    };

    let name = name.trim();

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::new(
            name.to_string(),
            "flag names may only contain letters, digits and underscores".to_string(),
        ));
    }

    Ok(Field::Named(name.to_ascii_lowercase()))
}

fn parse_bits(inner: &str) -> crate::Result<Field> {
    let inner = inner.trim();

    // `[bit N]` is equivalent to `[N]`.
    if let Some(bit) = inner
        .to_ascii_lowercase()
        .strip_prefix("bit")
        .map(str::trim)
        .map(ToOwned::to_owned)
    {
        if !bit.is_empty() {
            return single_bit(parse_number(&bit)?);
        }
    }

    if let Some((hi, lo)) = inner.split_once(':') {
        let hi = parse_number(hi)?;
        let lo = parse_number(lo)?;

        if hi > 31 {
            return Err(Error::new(
                inner.to_string(),
                "bit positions must be at most 31".to_string(),
            ));
        }

        if lo > hi {
            return Err(Error::new(
                inner.to_string(),
                "bit range must be written high:low".to_string(),
            ));
        }

        return Ok(Field::Bits { hi, lo });
    }

    single_bit(parse_number(inner)?)
}

fn single_bit(bit: u32) -> crate::Result<Field> {
    if bit > 31 {
        return Err(Error::new(
            bit.to_string(),
            "bit positions must be at most 31".to_string(),
        ));
    }

    Ok(Field::Bits { hi: bit, lo: bit })
}

fn parse_number(text: &str) -> crate::Result<u32> {
    let text = text.trim();

    let (digits, radix) = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (text, 10),
    };

    u32::from_str_radix(digits, radix).map_err(|inner| {
        Error::caused_by(
            text.to_string(),
            "could not be parsed as an integer".to_string(),
            inner,
        )
    })
}
